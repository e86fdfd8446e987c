//! Device session.
//!
//! A [`Device`] owns one driver handle for the lifetime of one request. It
//! connects and verifies the device identity on construction, and its `Drop`
//! cancels a receipt left pending and closes the link on every exit path.
//!
//! Queries and prints live here; the fiscal transactions (receipts, cash,
//! shift closing) are implemented in [`super::transaction`] on the same type.

use crate::kkm::config::KkmConfig;
use crate::kkm::connparams::{ConnParams, KnownConnParams};
use crate::kkm::details::{PrintDetails, PrintableText};
use crate::kkm::driver::{
    tags, Command, DataType, FiscalDriver, FnDataType, Param, ReportType, UnitType,
    ALIGNMENT_CENTER, TEXT_WRAP_WORDS,
};
use crate::kkm::error::{KkmError, Result};
use crate::kkm::layout::Layout;
use crate::kkm::result::{
    AgentSign, CashStatPayload, FfdVersionsPayload, FnInfoPayload, FndtErrorsPayload,
    FwVersionsPayload, LastDocumentPayload, LastReceiptPayload, LastRegistrationPayload,
    OfdExchangeStatusPayload, OperationResult, Payload, ReceiptStatePayload,
    RegistrationInfoPayload, ShiftStatePayload, StatusPayload, TaxationTypes,
};
use crate::kkm::types::{
    DocumentType, FfdVersion, PaymentType, ReceiptType, ShiftState, TextPosition,
};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

const HELLO_TITLE: &str = "Hello!";
const HELLO_TEXT: &str =
    "\nI am a hard-working cash register.\n\nI am glad to work with such wonderful people.";

// ---------------------------------------------------------------------------
// Sleeper
// ---------------------------------------------------------------------------

/// Blocking wait used between confirmation polls.
pub trait Sleeper: Send {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Records waits instead of sleeping. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    slept: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.slept.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
    }
}

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

pub struct Device {
    pub(super) driver: Box<dyn FiscalDriver>,
    pub(super) config: Arc<KkmConfig>,
    pub(super) serial_number: String,
    pub(super) log_prefix: String,
    pub(super) line_length: u32,
    /// Set while a receipt is open on the device and owned by this session.
    pub(super) need_cancel: bool,
    pub(super) sleeper: Box<dyn Sleeper>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("driver", &self.driver.name())
            .field("serial_number", &self.serial_number)
            .field("log_prefix", &self.log_prefix)
            .field("line_length", &self.line_length)
            .field("need_cancel", &self.need_cancel)
            .finish_non_exhaustive()
    }
}

impl Device {
    fn detached(driver: Box<dyn FiscalDriver>, config: Arc<KkmConfig>, log_prefix: String) -> Self {
        let line_length = config.default_line_length;
        Self {
            driver,
            config,
            serial_number: String::new(),
            log_prefix,
            line_length,
            need_cancel: false,
            sleeper: Box::new(ThreadSleeper),
        }
    }

    /// Open a session over an unverified descriptor.
    pub fn connect(
        driver: Box<dyn FiscalDriver>,
        params: &ConnParams,
        config: Arc<KkmConfig>,
        log_prefix: impl Into<String>,
    ) -> Result<Self> {
        let mut device = Self::detached(driver, config, log_prefix.into());
        device.open(params)?;
        Ok(device)
    }

    /// Open a session over a learned descriptor. The device must report the
    /// serial number the descriptor was saved under.
    pub fn connect_known(
        driver: Box<dyn FiscalDriver>,
        known: &KnownConnParams,
        config: Arc<KkmConfig>,
        log_prefix: impl Into<String>,
    ) -> Result<Self> {
        let device = Self::connect(driver, known.params(), config, log_prefix)?;
        if device.serial_number != known.serial_number() {
            return Err(KkmError::SerialMismatch {
                expected: known.serial_number().to_string(),
                actual: device.serial_number.clone(),
            });
        }
        Ok(device)
    }

    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    fn open(&mut self, params: &ConnParams) -> Result<()> {
        params.apply(self.driver.as_mut(), &self.config)?;
        if self.driver.execute(Command::Open).is_err() {
            return Err(self.driver_error());
        }
        if !self.driver.is_opened() {
            return Err(KkmError::NotAvailable);
        }

        if self
            .driver
            .execute(Command::QueryData(DataType::SerialNumber))
            .is_err()
        {
            return Err(self.driver_error());
        }
        let serial = self.driver.param_string(Param::SerialNumber);
        if serial.is_empty() {
            return Err(KkmError::Exchange);
        }
        self.serial_number = serial;

        if self
            .driver
            .execute(Command::QueryData(DataType::ReceiptLineLength))
            .is_err()
        {
            return Err(self.driver_error());
        }
        match u32::try_from(self.driver.param_int(Param::ReceiptLineLength)) {
            Ok(length) if length >= 1 => self.line_length = length,
            _ => {
                self.line_length = self.config.default_line_length;
                warn!(
                    "{}Could not read the receipt line length, using default {}",
                    self.ctx(),
                    self.line_length
                );
            }
        }
        debug!("{}Connected via {}", self.ctx(), params);
        Ok(())
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn line_length(&self) -> u32 {
        self.line_length
    }

    /// Whether teardown will cancel an open receipt.
    pub fn need_cancel(&self) -> bool {
        self.need_cancel
    }

    pub fn config(&self) -> &KkmConfig {
        &self.config
    }

    /// Log context: `"{prefix}KKM [{serial}]: "`.
    pub(super) fn ctx(&self) -> String {
        format!("{}KKM [{}]: ", self.log_prefix, self.serial_number)
    }

    // -- failure helpers --------------------------------------------------

    /// Log `message` and record it as the result's failure.
    pub(super) fn fail(&self, result: &mut OperationResult, message: impl Into<String>) {
        let message = message.into();
        warn!("{}Error: {}", self.ctx(), message);
        result.fail(message);
    }

    /// Read and clear the driver's pending error description.
    pub(super) fn take_error(&mut self) -> String {
        let message = self.driver.error_description();
        self.driver.reset_error();
        message
    }

    /// Record the driver's pending error as the result's failure.
    pub(super) fn fail_driver(&mut self, result: &mut OperationResult) {
        let message = self.take_error();
        self.fail(result, message);
    }

    /// Take the driver's pending error as a `KkmError`.
    pub(super) fn driver_error(&mut self) -> KkmError {
        KkmError::Driver(self.take_error())
    }

    /// Execute `command`; on failure record it into `result`. Returns success.
    pub(super) fn run(&mut self, result: &mut OperationResult, command: Command) -> bool {
        if self.driver.execute(command).is_err() {
            self.fail_driver(result);
            return false;
        }
        true
    }

    // -- text output ------------------------------------------------------

    pub(super) fn layout(&self) -> Layout {
        Layout::new(self.line_length)
    }

    /// Print a centred separator line with its own margins.
    pub(super) fn print_separator(&mut self, top: u32, bottom: Option<u32>) -> Result<()> {
        let text = self.layout().separator(top, bottom);
        self.driver.set_param(Param::Alignment, ALIGNMENT_CENTER.into());
        self.driver.set_param(Param::Text, text.into());
        self.driver
            .set_param(Param::Defer, TextPosition::Auto.code().into());
        if self.driver.execute(Command::PrintText).is_err() {
            return Err(self.driver_error());
        }
        Ok(())
    }

    /// Print one text block. Blocks that resolve to nothing are skipped.
    pub(super) fn print_block(&mut self, block: &PrintableText, position: TextPosition) -> Result<()> {
        let Some(job) = self.layout().text(block) else {
            return Ok(());
        };
        if job.magnified {
            self.driver.set_param(Param::FontDoubleWidth, true.into());
        }
        if job.center {
            self.driver.set_param(Param::Alignment, ALIGNMENT_CENTER.into());
        }
        self.driver.set_param(Param::TextWrap, TEXT_WRAP_WORDS.into());
        self.driver.set_param(Param::Text, job.text.into());
        self.driver.set_param(Param::Defer, position.code().into());
        if self.driver.execute(Command::PrintText).is_err() {
            return Err(self.driver_error());
        }
        Ok(())
    }

    // -- queries ----------------------------------------------------------

    pub fn get_status(&mut self) -> OperationResult {
        debug!("{}Status", self.ctx());
        let mut result = OperationResult::new();
        if !self.run(&mut result, Command::QueryData(DataType::Status)) {
            return result;
        }
        let d = &self.driver;
        let document_type = DocumentType::from_code(d.param_int(Param::DocumentType));
        let receipt_type = ReceiptType::from_code(d.param_int(Param::ReceiptType));
        let shift_state = ShiftState::from_code(d.param_int(Param::ShiftState));
        result.payload = Some(Payload::Status(StatusPayload {
            date_time: d.param_datetime(Param::DateTime),
            model: d.param_u32(Param::Model),
            model_name: d.param_string(Param::ModelName),
            serial_number: d.param_string(Param::SerialNumber),
            logical_number: d.param_u32(Param::LogicalNumber),
            mode: d.param_u32(Param::Mode),
            sub_mode: d.param_u32(Param::SubMode),
            operator_id: d.param_u32(Param::OperatorId),
            operator_registered: d.param_bool(Param::OperatorRegistered),
            document_number: d.param_u32(Param::DocumentNumber),
            document_type,
            document_type_text: document_type.label(),
            receipt_number: d.param_u32(Param::ReceiptNumber),
            receipt_sum: d.param_f64(Param::ReceiptSum),
            receipt_type,
            receipt_type_text: receipt_type.label(),
            receipt_line_length: d.param_u32(Param::ReceiptLineLength),
            receipt_line_length_pix: d.param_u32(Param::ReceiptLineLengthPix),
            shift_number: d.param_u32(Param::ShiftNumber),
            shift_state,
            shift_state_text: shift_state.label(),
            blocked: d.param_bool(Param::Blocked),
            cash_drawer_opened: d.param_bool(Param::CashDrawerOpened),
            cover_opened: d.param_bool(Param::CoverOpened),
            cut_error: d.param_bool(Param::CutError),
            fiscal: d.param_bool(Param::Fiscal),
            fn_fiscal: d.param_bool(Param::FnFiscal),
            fn_present: d.param_bool(Param::FnPresent),
            invalid_fn: d.param_bool(Param::InvalidFn),
            paper_near_end: d.param_bool(Param::PaperNearEnd),
            printer_connection_lost: d.param_bool(Param::PrinterConnectionLost),
            printer_error: d.param_bool(Param::PrinterError),
            printer_overheat: d.param_bool(Param::PrinterOverheat),
            receipt_paper_present: d.param_bool(Param::ReceiptPaperPresent),
        }));
        result
    }

    pub fn get_shift_state(&mut self) -> OperationResult {
        debug!("{}Shift state", self.ctx());
        let mut result = OperationResult::new();
        if !self.run(&mut result, Command::QueryData(DataType::ShiftState)) {
            return result;
        }
        let shift_state = ShiftState::from_code(self.driver.param_int(Param::ShiftState));
        let shift_number = self.driver.param_u32(Param::ShiftNumber);
        let expired_at = self.driver.param_datetime(Param::DateTime);

        if !self.run(&mut result, Command::FnQueryData(FnDataType::Shift)) {
            return result;
        }
        let receipt_number = self.driver.param_u32(Param::ReceiptNumber);
        // Both sources should agree; a mismatch is only reported.
        if self.driver.param_u32(Param::ShiftNumber) != shift_number {
            warn!(
                "{}Shift number on the device does not match the fiscal storage",
                self.ctx()
            );
        }

        if !self.run(&mut result, Command::FnQueryData(FnDataType::DocumentsCountInShift)) {
            return result;
        }
        result.payload = Some(Payload::ShiftState(ShiftStatePayload {
            shift_state,
            shift_state_text: shift_state.label(),
            shift_number,
            expired_at,
            receipt_number,
            documents_count: self.driver.param_u32(Param::DocumentsCount),
        }));
        result
    }

    pub fn get_receipt_state(&mut self) -> OperationResult {
        debug!("{}Receipt state", self.ctx());
        let mut result = OperationResult::new();
        if !self.run(&mut result, Command::QueryData(DataType::ReceiptState)) {
            return result;
        }
        let d = &self.driver;
        let receipt_type = ReceiptType::from_code(d.param_int(Param::ReceiptType));
        result.payload = Some(Payload::ReceiptState(ReceiptStatePayload {
            receipt_type,
            receipt_type_text: receipt_type.label(),
            receipt_number: d.param_u32(Param::ReceiptNumber),
            document_number: d.param_u32(Param::DocumentNumber),
            sum: d.param_f64(Param::ReceiptSum),
            remainder: d.param_f64(Param::Remainder),
            change: d.param_f64(Param::Change),
        }));
        result
    }

    fn query_cash_payments(&mut self, result: &mut OperationResult, receipt_type: ReceiptType) -> Option<f64> {
        self.driver
            .set_param(Param::PaymentType, PaymentType::Cash.code().into());
        self.driver
            .set_param(Param::ReceiptType, receipt_type.code().into());
        self.run(result, Command::QueryData(DataType::PaymentSum))
            .then(|| self.driver.param_f64(Param::Sum))
    }

    pub fn get_cash_stat(&mut self) -> OperationResult {
        debug!("{}Cash statistics", self.ctx());
        let mut result = OperationResult::new();
        let Some(sell_cash_sum) = self.query_cash_payments(&mut result, ReceiptType::Sell) else {
            return result;
        };
        let Some(sell_return_cash_sum) = self.query_cash_payments(&mut result, ReceiptType::SellReturn)
        else {
            return result;
        };
        if !self.run(&mut result, Command::QueryData(DataType::CashInSum)) {
            return result;
        }
        let cash_in_sum = self.driver.param_f64(Param::Sum);
        if !self.run(&mut result, Command::QueryData(DataType::CashOutSum)) {
            return result;
        }
        let cash_out_sum = self.driver.param_f64(Param::Sum);
        if !self.run(&mut result, Command::QueryData(DataType::CashInCount)) {
            return result;
        }
        let cash_in_count = self.driver.param_u32(Param::DocumentsCount);
        if !self.run(&mut result, Command::QueryData(DataType::CashOutCount)) {
            return result;
        }
        let cash_out_count = self.driver.param_u32(Param::DocumentsCount);
        if !self.run(&mut result, Command::QueryData(DataType::CashSum)) {
            return result;
        }
        result.payload = Some(Payload::CashStat(CashStatPayload {
            sell_cash_sum,
            sell_return_cash_sum,
            cash_sum: self.driver.param_f64(Param::Sum),
            cash_in_sum,
            cash_out_sum,
            cash_in_count,
            cash_out_count,
        }));
        result
    }

    pub fn get_ofd_exchange_status(&mut self) -> OperationResult {
        debug!("{}OFD exchange status", self.ctx());
        let mut result = OperationResult::new();
        if !self.run(&mut result, Command::FnQueryData(FnDataType::OfdExchangeStatus)) {
            return result;
        }
        let d = &self.driver;
        let mut payload = OfdExchangeStatusPayload {
            exchange_status: d.param_u32(Param::OfdExchangeStatus),
            unsent_count: d.param_u32(Param::DocumentsCount),
            first_unsent_number: d.param_u32(Param::DocumentNumber),
            ofd_message_read: d.param_bool(Param::OfdMessageRead),
            first_unsent_date_time: d.param_datetime(Param::DateTime),
            okp_date_time: d.param_datetime(Param::LastSuccessfulOkp),
            last_sent_date_time: None,
        };
        if !self.run(&mut result, Command::QueryData(DataType::LastSentOfdDocumentDateTime)) {
            return result;
        }
        payload.last_sent_date_time = self.driver.param_datetime(Param::DateTime);
        result.payload = Some(Payload::OfdExchangeStatus(payload));
        result
    }

    pub fn get_fn_info(&mut self) -> OperationResult {
        debug!("{}Fiscal storage info", self.ctx());
        let mut result = OperationResult::new();
        if !self.run(&mut result, Command::FnQueryData(FnDataType::FnInfo)) {
            return result;
        }
        let d = &self.driver;
        let keys_updater_server_uri = if d.param_bool(Param::FnContainsKeysUpdaterServerUri) {
            d.param_string(Param::FnKeysUpdaterServerUri)
        } else {
            String::new()
        };
        result.payload = Some(Payload::FnInfo(FnInfoPayload {
            serial: d.param_string(Param::SerialNumber),
            version: d.param_string(Param::FnVersion),
            execution: d.param_string(Param::FnExecution),
            fn_type: d.param_u32(Param::FnType),
            state: d.param_u32(Param::FnState),
            flags: d.param_u32(Param::FnFlags),
            need_replacement: d.param_bool(Param::FnNeedReplacement),
            exhausted: d.param_bool(Param::FnResourceExhausted),
            memory_overflow: d.param_bool(Param::FnMemoryOverflow),
            ofd_timeout: d.param_bool(Param::FnOfdTimeout),
            critical_error: d.param_bool(Param::FnCriticalError),
            keys_updater_server_uri,
        }));
        result
    }

    pub fn get_registration_info(&mut self) -> OperationResult {
        debug!("{}Registration info", self.ctx());
        let mut result = OperationResult::new();
        if !self.run(&mut result, Command::FnQueryData(FnDataType::RegInfo)) {
            return result;
        }
        let d = &self.driver;
        let text = |tag: u16| d.param_string(Param::Tag(tag));
        let flag = |tag: u16| d.param_bool(Param::Tag(tag));
        let payload = RegistrationInfoPayload {
            fns_url: text(tags::FNS_URL),
            organization_address: text(tags::ORGANIZATION_ADDRESS),
            organization_vatin: text(tags::ORGANIZATION_VATIN),
            organization_name: text(tags::ORGANIZATION_NAME),
            organization_email: text(tags::SELLER_EMAIL),
            payments_address: text(tags::PAYMENTS_ADDRESS),
            registration_number: text(tags::REGISTRATION_NUMBER),
            machine_number: text(tags::MACHINE_NUMBER),
            ofd_vatin: text(tags::OFD_VATIN),
            ofd_name: text(tags::OFD_NAME),
            taxation_types: TaxationTypes::from_mask(d.param_u32(Param::Tag(tags::TAXATION_TYPES))),
            agent_sign: AgentSign::from_mask(d.param_u32(Param::Tag(tags::AGENT_SIGN))),
            ffd_version: FfdVersion::from_code(d.param_int(Param::Tag(tags::FFD_VERSION))),
            auto_mode_sign: flag(tags::AUTO_MODE_SIGN),
            offline_mode_sign: flag(tags::OFFLINE_MODE_SIGN),
            encryption_sign: flag(tags::ENCRYPTION_SIGN),
            internet_sign: flag(tags::INTERNET_SIGN),
            service_sign: flag(tags::SERVICE_SIGN),
            bso_sign: flag(tags::BSO_SIGN),
            lottery_sign: flag(tags::LOTTERY_SIGN),
            gambling_sign: flag(tags::GAMBLING_SIGN),
            excise_sign: flag(tags::EXCISE_SIGN),
            machine_installation_sign: flag(tags::MACHINE_INSTALLATION_SIGN),
            trade_marked_products: d.param_bool(Param::TradeMarkedProducts),
            insurance_activity: d.param_bool(Param::InsuranceActivity),
            pawn_shop_activity: d.param_bool(Param::PawnShopActivity),
            vending: d.param_bool(Param::Vending),
            catering: d.param_bool(Param::Catering),
            wholesale: d.param_bool(Param::Wholesale),
        };
        result.payload = Some(Payload::RegistrationInfo(Box::new(payload)));
        result
    }

    pub fn get_last_registration(&mut self) -> OperationResult {
        debug!("{}Last registration", self.ctx());
        let mut result = OperationResult::new();
        if !self.run(&mut result, Command::FnQueryData(FnDataType::LastRegistration)) {
            return result;
        }
        let d = &self.driver;
        result.payload = Some(Payload::LastRegistration(LastRegistrationPayload {
            document_number: d.param_u32(Param::DocumentNumber),
            registrations_count: d.param_u32(Param::RegistrationsCount),
            registration_date_time: d.param_datetime(Param::DateTime),
        }));
        result
    }

    pub fn get_last_receipt(&mut self) -> OperationResult {
        debug!("{}Last receipt", self.ctx());
        let mut result = OperationResult::new();
        if !self.run(&mut result, Command::FnQueryData(FnDataType::LastReceipt)) {
            return result;
        }
        let d = &self.driver;
        result.payload = Some(Payload::LastReceipt(LastReceiptPayload {
            document_number: d.param_u32(Param::DocumentNumber),
            receipt_sum: d.param_f64(Param::ReceiptSum),
            fiscal_sign: d.param_string(Param::FiscalSign),
            document_date_time: d.param_datetime(Param::DateTime),
        }));
        result
    }

    pub fn get_last_document(&mut self) -> OperationResult {
        debug!("{}Last document", self.ctx());
        let mut result = OperationResult::new();
        if !self.run(&mut result, Command::FnQueryData(FnDataType::LastDocument)) {
            return result;
        }
        let d = &self.driver;
        result.payload = Some(Payload::LastDocument(LastDocumentPayload {
            document_number: d.param_u32(Param::DocumentNumber),
            fiscal_sign: d.param_string(Param::FiscalSign),
            document_date_time: d.param_datetime(Param::DateTime),
        }));
        result
    }

    pub fn get_errors(&mut self) -> OperationResult {
        debug!("{}Exchange errors", self.ctx());
        let mut result = OperationResult::new();
        if !self.run(&mut result, Command::FnQueryData(FnDataType::Errors)) {
            return result;
        }
        let d = &self.driver;
        result.payload = Some(Payload::Errors(FndtErrorsPayload {
            network_error: d.param_u32(Param::NetworkError),
            network_error_text: d.param_string(Param::NetworkErrorText),
            ofd_error: d.param_u32(Param::OfdError),
            ofd_error_text: d.param_string(Param::OfdErrorText),
            fn_error: d.param_u32(Param::FnError),
            fn_error_text: d.param_string(Param::FnErrorText),
            failed_document_number: d.param_u32(Param::DocumentNumber),
            failed_command_code: d.param_u32(Param::CommandCode),
            success_date_time: d.param_datetime(Param::DateTime),
            data_for_send_is_empty: d.param_bool(Param::DataForSendIsEmpty),
        }));
        result
    }

    pub fn get_ffd_version(&mut self) -> OperationResult {
        debug!("{}FFD versions", self.ctx());
        let mut result = OperationResult::new();
        if !self.run(&mut result, Command::FnQueryData(FnDataType::FfdVersions)) {
            return result;
        }
        let version = |key: Param| FfdVersion::from_code(self.driver.param_int(key));
        result.payload = Some(Payload::FfdVersions(FfdVersionsPayload {
            device_ffd: version(Param::DeviceFfdVersion),
            device_min_ffd: version(Param::DeviceMinFfdVersion),
            device_max_ffd: version(Param::DeviceMaxFfdVersion),
            fn_ffd: version(Param::FnFfdVersion),
            fn_max_ffd: version(Param::FnMaxFfdVersion),
            ffd: version(Param::FfdVersion),
        }));
        result
    }

    fn query_unit_version(&mut self, result: &mut OperationResult, unit: UnitType) -> Option<String> {
        self.driver.set_param(Param::UnitType, unit.code().into());
        self.run(result, Command::QueryData(DataType::UnitVersion))
            .then(|| self.driver.param_string(Param::UnitVersion))
    }

    pub fn get_fw_version(&mut self) -> OperationResult {
        debug!("{}Firmware versions", self.ctx());
        let mut result = OperationResult::new();
        let mut payload = FwVersionsPayload::default();
        let Some(firmware) = self.query_unit_version(&mut result, UnitType::Firmware) else {
            return result;
        };
        payload.firmware = firmware;
        let Some(configuration) = self.query_unit_version(&mut result, UnitType::Configuration)
        else {
            return result;
        };
        payload.configuration = configuration;
        payload.release = self.driver.param_string(Param::UnitReleaseVersion);
        let Some(templates) = self.query_unit_version(&mut result, UnitType::Templates) else {
            return result;
        };
        payload.templates = templates;
        let Some(control_unit) = self.query_unit_version(&mut result, UnitType::ControlUnit) else {
            return result;
        };
        payload.control_unit = control_unit;
        let Some(boot) = self.query_unit_version(&mut result, UnitType::Boot) else {
            return result;
        };
        payload.boot = boot;
        result.payload = Some(Payload::FwVersions(payload));
        result
    }

    // -- prints -----------------------------------------------------------

    /// Probe print used when learning a device. Any failure is an error.
    pub fn print_hello(&mut self) -> Result<()> {
        debug!("{}Hello print", self.ctx());
        if self.driver.execute(Command::BeginNonfiscalDocument).is_err() {
            return Err(self.driver_error());
        }
        self.print_separator(0, Some(1))?;
        self.print_block(&PrintableText::new(HELLO_TITLE, true, true, false), TextPosition::Auto)?;
        self.print_block(&PrintableText::new(HELLO_TEXT, true, false, false), TextPosition::Auto)?;
        self.print_separator(1, Some(0))?;
        self.driver.set_param(Param::PrintFooter, false.into());
        if self.driver.execute(Command::EndNonfiscalDocument).is_err() {
            return Err(self.driver_error());
        }
        Ok(())
    }

    /// Free-form non-fiscal document. A failing text block is an error;
    /// opening and closing failures are recorded in the result.
    pub fn print_non_fiscal_document(&mut self, details: &PrintDetails) -> Result<OperationResult> {
        debug!("{}Non-fiscal document", self.ctx());
        let mut result = OperationResult::new();
        if !self.run(&mut result, Command::BeginNonfiscalDocument) {
            return Ok(result);
        }
        if details.cliche && !self.run(&mut result, Command::PrintCliche) {
            return Ok(result);
        }
        for block in &details.document {
            self.print_block(block, TextPosition::Auto)?;
        }
        self.driver
            .set_param(Param::PrintFooter, details.footer.into());
        self.run(&mut result, Command::EndNonfiscalDocument);
        Ok(result)
    }

    fn print_report(&mut self, report: ReportType) -> OperationResult {
        debug!("{}Printing {:?} report", self.ctx(), report);
        let mut result = OperationResult::new();
        self.run(&mut result, Command::Report(report));
        result
    }

    pub fn print_demo(&mut self) -> OperationResult {
        self.print_report(ReportType::KktDemo)
    }

    pub fn print_info(&mut self) -> OperationResult {
        self.print_report(ReportType::KktInfo)
    }

    pub fn print_fn_registrations(&mut self) -> OperationResult {
        self.print_report(ReportType::FnRegistrations)
    }

    pub fn print_ofd_test(&mut self) -> OperationResult {
        self.print_report(ReportType::OfdTest)
    }

    pub fn print_close_shift_reports(&mut self) -> OperationResult {
        self.print_report(ReportType::CloseShiftReports)
    }

    pub fn print_last_document(&mut self) -> OperationResult {
        self.print_report(ReportType::LastDocument)
    }

    /// Settlement state report. It is a fiscal document, so it is confirmed.
    pub fn print_ofd_exchange_status(&mut self) -> OperationResult {
        let mut result = self.print_report(ReportType::OfdExchangeStatus);
        if result.success {
            self.check_document_closed(&mut result);
        }
        result
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if self.need_cancel && self.driver.execute(Command::CancelReceipt).is_err() {
            let description = self.take_error();
            warn!("{}Receipt cancel error: {}", self.ctx(), description);
        }
        // Closing an unopened link is harmless.
        let _ = self.driver.execute(Command::Close);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kkm::emulator::{CheckOutcome, EmulatedDevice};
    use crate::kkm::result::merge_all;
    use serde_json::json;

    const SERIAL: &str = "00106700000001";

    fn com() -> ConnParams {
        ConnParams::resolve("com,3").unwrap()
    }

    fn session(device: &EmulatedDevice) -> Device {
        Device::connect(
            Box::new(device.driver()),
            &com(),
            Arc::new(KkmConfig::default()),
            "Test: ",
        )
        .unwrap()
        .with_sleeper(Box::new(RecordingSleeper::default()))
    }

    #[test]
    fn test_connect_reads_identity_and_width() {
        let device = EmulatedDevice::new(SERIAL);
        device.set_line_length(48);
        let kkm = session(&device);
        assert_eq!(kkm.serial_number(), SERIAL);
        assert_eq!(kkm.line_length(), 48);
        assert!(!kkm.need_cancel());
        assert_eq!(
            device.journal(),
            vec![
                Command::Open,
                Command::QueryData(DataType::SerialNumber),
                Command::QueryData(DataType::ReceiptLineLength),
            ]
        );
    }

    #[test]
    fn test_invalid_width_falls_back_to_default() {
        let device = EmulatedDevice::new(SERIAL);
        device.set_line_length(0);
        let kkm = session(&device);
        assert_eq!(kkm.line_length(), KkmConfig::default().default_line_length);
    }

    #[test]
    fn test_unavailable_device_fails_and_closes() {
        let device = EmulatedDevice::new(SERIAL);
        device.set_available(false);
        let err = Device::connect(
            Box::new(device.driver()),
            &com(),
            Arc::new(KkmConfig::default()),
            "",
        )
        .unwrap_err();
        assert!(matches!(err, KkmError::NotAvailable));
        assert_eq!(device.journal(), vec![Command::Open, Command::Close]);
    }

    #[test]
    fn test_empty_serial_is_exchange_error() {
        let device = EmulatedDevice::new("");
        let err = Device::connect(
            Box::new(device.driver()),
            &com(),
            Arc::new(KkmConfig::default()),
            "",
        )
        .unwrap_err();
        assert!(matches!(err, KkmError::Exchange));
    }

    #[test]
    fn test_open_failure_carries_driver_description() {
        let device = EmulatedDevice::new(SERIAL);
        device.fail_nth(Command::Open, 1, "Port busy");
        let err = Device::connect(
            Box::new(device.driver()),
            &com(),
            Arc::new(KkmConfig::default()),
            "",
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Port busy");
    }

    #[test]
    fn test_known_serial_mismatch_fails_after_open() {
        let device = EmulatedDevice::new("222");
        let known = KnownConnParams::new(com(), "111");
        let err = Device::connect_known(
            Box::new(device.driver()),
            &known,
            Arc::new(KkmConfig::default()),
            "",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            KkmError::SerialMismatch { ref expected, ref actual } if expected == "111" && actual == "222"
        ));
        assert_eq!(device.count(Command::Close), 1);
    }

    #[test]
    fn test_drop_cancels_pending_receipt() {
        let device = EmulatedDevice::new(SERIAL);
        device.force_open_receipt(ReceiptType::Sell);
        let mut kkm = session(&device);
        kkm.need_cancel = true;
        drop(kkm);
        assert!(!device.receipt_open());
        assert_eq!(device.count(Command::CancelReceipt), 1);
        assert_eq!(device.journal().last(), Some(&Command::Close));
    }

    #[test]
    fn test_drop_cancel_failure_still_closes() {
        let device = EmulatedDevice::new(SERIAL);
        device.fail_always(Command::CancelReceipt, "No paper");
        let mut kkm = session(&device);
        kkm.need_cancel = true;
        drop(kkm);
        assert_eq!(device.count(Command::CancelReceipt), 1);
        assert_eq!(device.count(Command::Close), 1);
    }

    #[test]
    fn test_status_payload() {
        let device = EmulatedDevice::new(SERIAL);
        let mut kkm = session(&device);
        let json = merge_all(&[kkm.get_status()]);
        assert_eq!(json["success"], json!(true));
        assert_eq!(json["status"]["serialNumber"], json!(SERIAL));
        assert_eq!(json["status"]["shiftState"], json!("closed"));
        assert_eq!(json["status"]["receiptType"], json!("closed"));
    }

    #[test]
    fn test_query_failure_records_description_without_payload() {
        let device = EmulatedDevice::new(SERIAL);
        let mut kkm = session(&device);
        device.fail_nth(Command::FnQueryData(FnDataType::FnInfo), 1, "FN not found");
        let result = kkm.get_fn_info();
        assert!(!result.success);
        assert_eq!(result.message, "FN not found");
        assert!(result.payload.is_none());
    }

    #[test]
    fn test_shift_number_mismatch_is_only_a_warning() {
        let device = EmulatedDevice::new(SERIAL);
        device.set_shift_state(ShiftState::Opened);
        device.set_fn_shift_offset(1);
        let mut kkm = session(&device);
        let result = kkm.get_shift_state();
        assert!(result.success);
        match result.payload {
            Some(Payload::ShiftState(p)) => {
                assert_eq!(p.shift_state, ShiftState::Opened);
                assert_eq!(p.shift_number, 1);
                assert!(p.expired_at.is_some());
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_cash_stat_reads_every_counter() {
        let device = EmulatedDevice::new(SERIAL);
        device.set_cash_sum(75.5);
        let mut kkm = session(&device);
        match kkm.get_cash_stat().payload {
            Some(Payload::CashStat(p)) => {
                assert_eq!(p.cash_sum, 75.5);
                assert_eq!(p.cash_in_count, 0);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_fw_versions_cover_all_units() {
        let device = EmulatedDevice::new(SERIAL);
        let mut kkm = session(&device);
        match kkm.get_fw_version().payload {
            Some(Payload::FwVersions(p)) => {
                assert_eq!(p.firmware, "5.8.100");
                assert_eq!(p.configuration, "48.2.1");
                assert_eq!(p.release, "7781");
                assert_eq!(p.templates, "1.4.0");
                assert_eq!(p.control_unit, "2.0.7");
                assert_eq!(p.boot, "1.1.3");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_registration_info_and_ffd() {
        let device = EmulatedDevice::new(SERIAL);
        let mut kkm = session(&device);
        let json = merge_all(&[kkm.get_registration_info(), kkm.get_ffd_version()]);
        assert_eq!(json["registrationInfo"]["ffdVersion"], json!("1.2"));
        assert_eq!(json["registrationInfo"]["taxationTypes"]["osn"], json!(true));
        assert_eq!(json["ffdVersions"]["deviceMinFfd"], json!("1.0.5"));
    }

    #[test]
    fn test_hello_print_order() {
        let device = EmulatedDevice::new(SERIAL);
        device.set_line_length(24);
        let mut kkm = session(&device);
        kkm.print_hello().unwrap();
        let printed = device.printed();
        let rule = "-".repeat(24);
        assert_eq!(printed.len(), 4);
        assert_eq!(printed[0], format!("{rule}\n"));
        assert_eq!(printed[1], format!("\n{HELLO_TITLE}\n"));
        assert_eq!(printed[3], format!("\n{rule}"));
    }

    #[test]
    fn test_hello_print_failure_is_error() {
        let device = EmulatedDevice::new(SERIAL);
        let mut kkm = session(&device);
        device.fail_nth(Command::PrintText, 2, "Cover open");
        let err = kkm.print_hello().unwrap_err();
        assert_eq!(err.to_string(), "Cover open");
    }

    #[test]
    fn test_non_fiscal_document_blocks() {
        let device = EmulatedDevice::new(SERIAL);
        device.set_line_length(10);
        let mut kkm = session(&device);
        let details = PrintDetails::from_json(&json!({
            "cliche": true,
            "footer": true,
            "document": [
                { "content": "Line one" },
                { "separator": true },
                { "content": "" }
            ]
        }))
        .unwrap();
        let result = kkm.print_non_fiscal_document(&details).unwrap();
        assert!(result.success);
        let printed = device.printed();
        assert_eq!(printed[1], "Line one");
        assert_eq!(printed[2], format!("{}\n", "-".repeat(10)));
        assert_eq!(printed.first().map(String::as_str), Some("[cliche]"));
        assert_eq!(printed.last().map(String::as_str), Some("[footer]"));
        assert_eq!(printed.len(), 4);
    }

    #[test]
    fn test_report_prints() {
        let device = EmulatedDevice::new(SERIAL);
        let mut kkm = session(&device);
        assert!(kkm.print_demo().success);
        assert!(kkm.print_info().success);
        assert!(kkm.print_last_document().success);
        assert_eq!(
            device.reports(),
            vec![ReportType::KktDemo, ReportType::KktInfo, ReportType::LastDocument]
        );
    }

    #[test]
    fn test_ofd_exchange_status_print_is_confirmed() {
        let device = EmulatedDevice::new(SERIAL);
        let mut kkm = session(&device);
        device.set_check_fallback(CheckOutcome::Error);
        let result = kkm.print_ofd_exchange_status();
        assert!(!result.success);
        assert_eq!(result.message, crate::kkm::error::CHECKING_ERROR);
        assert_eq!(device.count(Command::CheckDocumentClosed), 5);
    }
}

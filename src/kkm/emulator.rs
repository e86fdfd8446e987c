//! In-memory fiscal device.
//!
//! `EmulatedDevice` is the "physical" device: shift, receipt, cash drawer,
//! counters and the journal of every command executed against it. Each session
//! gets its own `EmulatedDriver` handle (settings, staged parameters, link and
//! error state) sharing that device, so state survives across sessions the way
//! a real register's does.
//!
//! Fault injection is per command: fail the n-th upcoming call, fail every
//! call, or script the outcomes of the confirmation primitives.

use crate::kkm::driver::{
    tags, Command, DataType, DriverFactory, FiscalDriver, FnDataType, Param, ParamValue,
    ReportType, Setting, Status, UnitType, PORT_COM,
};
use crate::kkm::types::{DocumentType, PaymentType, ReceiptType, ShiftState};
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

const ERR_GENERIC: i32 = -1;
const NO_ERRORS: &str = "No errors";

/// Tags packed by `UtilFormTlv`.
const PACKABLE_TAGS: [u16; 9] = [
    tags::CUSTOMER_NAME,
    tags::CUSTOMER_INN,
    tags::CUSTOMER_BIRTHDATE,
    tags::CUSTOMER_CITIZENSHIP,
    tags::CUSTOMER_DOCUMENT_CODE,
    tags::CUSTOMER_DOCUMENT_DATA,
    tags::CUSTOMER_ADDRESS,
    tags::USER_ATTRIBUTE_NAME,
    tags::USER_ATTRIBUTE_VALUE,
];

/// Tags captured onto the receipt record when it is opened.
const RECEIPT_TAGS: [u16; 6] = [
    tags::OPERATOR_NAME,
    tags::OPERATOR_INN,
    tags::CUSTOMER_CONTACT,
    tags::USER_ATTRIBUTE,
    tags::SELLER_EMAIL,
    tags::CUSTOMER_INFO,
];

// ---------------------------------------------------------------------------
// Scripted outcomes
// ---------------------------------------------------------------------------

/// Result of one `CheckDocumentClosed` poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The poll itself fails (negative status).
    Error,
    /// The poll succeeds and reports the given flags.
    Done { closed: bool, printed: bool },
}

impl CheckOutcome {
    pub const CLOSED_AND_PRINTED: CheckOutcome = CheckOutcome::Done {
        closed: true,
        printed: true,
    };
}

#[derive(Debug, Clone)]
struct FaultRule {
    /// Calls remaining until the fault fires; `None` fires on every call.
    countdown: Option<usize>,
    description: String,
}

// ---------------------------------------------------------------------------
// Device state
// ---------------------------------------------------------------------------

/// A registered receipt line, as the device recorded it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedItem {
    pub name: String,
    pub price: f64,
    pub quantity: f64,
    pub unit: i64,
    pub tax: i64,
}

/// A registered payment entry.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPayment {
    pub payment_type: i64,
    pub sum: f64,
    pub method: Option<i64>,
    pub id: Option<String>,
    pub add_info: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct OpenReceipt {
    receipt_type: ReceiptType,
    electronically: bool,
    items: Vec<RecordedItem>,
    payments: Vec<RecordedPayment>,
    tags: HashMap<u16, ParamValue>,
}

impl OpenReceipt {
    fn total(&self) -> f64 {
        self.items.iter().map(|i| i.price * i.quantity).sum()
    }

    fn paid(&self) -> f64 {
        self.payments
            .iter()
            .filter(|p| p.payment_type != PaymentType::ADD_INFO_CODE)
            .map(|p| p.sum)
            .sum()
    }
}

/// A receipt the device sealed.
#[derive(Debug, Clone)]
pub struct ClosedReceipt {
    pub receipt_type: ReceiptType,
    pub electronically: bool,
    pub items: Vec<RecordedItem>,
    pub payments: Vec<RecordedPayment>,
    pub tags: HashMap<u16, ParamValue>,
    pub total: f64,
    pub document_number: u32,
}

#[derive(Debug)]
struct DeviceState {
    serial_number: String,
    model_name: String,
    line_length: i64,
    available: bool,
    apply_settings_result: i32,
    last_settings: HashMap<Setting, String>,

    shift_state: ShiftState,
    shift_number: u32,
    fn_shift_offset: u32,
    shift_opened_at: Option<NaiveDateTime>,
    receipt_number: u32,
    documents_in_shift: u32,
    document_number: u32,
    last_document_type: DocumentType,
    last_document_at: Option<NaiveDateTime>,
    last_receipt_sum: f64,

    receipt: Option<OpenReceipt>,
    closed_receipts: Vec<ClosedReceipt>,
    nonfiscal_open: bool,
    operator: Option<String>,

    cash_sum: f64,
    cash_in_sum: f64,
    cash_out_sum: f64,
    cash_in_count: u32,
    cash_out_count: u32,
    sell_cash_sum: f64,
    sell_return_cash_sum: f64,

    journal: Vec<Command>,
    printed: Vec<String>,
    reports: Vec<ReportType>,
    faults: HashMap<Command, FaultRule>,
    check_script: VecDeque<CheckOutcome>,
    check_fallback: CheckOutcome,
    continue_script: VecDeque<bool>,
    continue_fallback: bool,
}

impl DeviceState {
    fn new(serial_number: &str) -> Self {
        Self {
            serial_number: serial_number.to_string(),
            model_name: "EMULATOR-F".into(),
            line_length: 42,
            available: true,
            apply_settings_result: 0,
            last_settings: HashMap::new(),
            shift_state: ShiftState::Closed,
            shift_number: 0,
            fn_shift_offset: 0,
            shift_opened_at: None,
            receipt_number: 0,
            documents_in_shift: 0,
            document_number: 0,
            last_document_type: DocumentType::Closed,
            last_document_at: None,
            last_receipt_sum: 0.0,
            receipt: None,
            closed_receipts: Vec::new(),
            nonfiscal_open: false,
            operator: None,
            cash_sum: 0.0,
            cash_in_sum: 0.0,
            cash_out_sum: 0.0,
            cash_in_count: 0,
            cash_out_count: 0,
            sell_cash_sum: 0.0,
            sell_return_cash_sum: 0.0,
            journal: Vec::new(),
            printed: Vec::new(),
            reports: Vec::new(),
            faults: HashMap::new(),
            check_script: VecDeque::new(),
            check_fallback: CheckOutcome::CLOSED_AND_PRINTED,
            continue_script: VecDeque::new(),
            continue_fallback: true,
        }
    }

    /// Consume an injected fault for `command`, if one fires now.
    fn take_fault(&mut self, command: Command) -> Option<String> {
        let rule = self.faults.get_mut(&command)?;
        match rule.countdown.as_mut() {
            None => Some(rule.description.clone()),
            Some(n) => {
                *n = n.saturating_sub(1);
                if *n == 0 {
                    self.faults.remove(&command).map(|r| r.description)
                } else {
                    None
                }
            }
        }
    }

    fn ensure_shift_open(&mut self) -> Result<(), String> {
        match self.shift_state {
            ShiftState::Opened => Ok(()),
            ShiftState::Expired => Err("Shift expired, close it first".into()),
            ShiftState::Closed => {
                self.shift_number += 1;
                self.shift_state = ShiftState::Opened;
                self.shift_opened_at = Some(now());
                self.receipt_number = 0;
                self.documents_in_shift = 1;
                self.seal(DocumentType::OpenShift);
                Ok(())
            }
        }
    }

    fn seal(&mut self, document_type: DocumentType) -> u32 {
        self.document_number += 1;
        self.last_document_type = document_type;
        self.last_document_at = Some(now());
        self.document_number
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn lock(state: &Arc<Mutex<DeviceState>>) -> MutexGuard<'_, DeviceState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// EmulatedDevice
// ---------------------------------------------------------------------------

/// Shared device state plus inspection and fault-injection controls.
#[derive(Clone)]
pub struct EmulatedDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl EmulatedDevice {
    pub fn new(serial_number: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState::new(serial_number))),
        }
    }

    /// A new driver handle bound to this device.
    pub fn driver(&self) -> EmulatedDriver {
        EmulatedDriver {
            state: Arc::clone(&self.state),
            settings: HashMap::new(),
            params: HashMap::new(),
            opened: false,
            error: None,
        }
    }

    pub fn factory(&self) -> DriverFactory {
        let device = self.clone();
        Arc::new(move || Box::new(device.driver()) as Box<dyn FiscalDriver>)
    }

    // -- configuration ----------------------------------------------------

    pub fn set_serial_number(&self, serial: &str) {
        lock(&self.state).serial_number = serial.to_string();
    }

    pub fn set_line_length(&self, chars: i64) {
        lock(&self.state).line_length = chars;
    }

    /// When false, `Open` succeeds but the link never reports opened.
    pub fn set_available(&self, available: bool) {
        lock(&self.state).available = available;
    }

    pub fn set_apply_settings_result(&self, result: i32) {
        lock(&self.state).apply_settings_result = result;
    }

    pub fn set_shift_state(&self, shift: ShiftState) {
        let mut s = lock(&self.state);
        if shift != ShiftState::Closed && s.shift_state == ShiftState::Closed {
            s.shift_number += 1;
            s.shift_opened_at = Some(now());
        }
        s.shift_state = shift;
    }

    /// Makes the fiscal storage report a shift number off by `offset`.
    pub fn set_fn_shift_offset(&self, offset: u32) {
        lock(&self.state).fn_shift_offset = offset;
    }

    pub fn set_cash_sum(&self, sum: f64) {
        lock(&self.state).cash_sum = sum;
    }

    /// Leave a receipt open, as if a previous session died mid-transaction.
    pub fn force_open_receipt(&self, receipt_type: ReceiptType) {
        lock(&self.state).receipt = Some(OpenReceipt {
            receipt_type,
            ..OpenReceipt::default()
        });
    }

    // -- fault injection --------------------------------------------------

    /// Fail the `nth` (1-based) upcoming execution of `command`, once.
    pub fn fail_nth(&self, command: Command, nth: usize, description: &str) {
        lock(&self.state).faults.insert(
            command,
            FaultRule {
                countdown: Some(nth.max(1)),
                description: description.to_string(),
            },
        );
    }

    /// Fail every execution of `command`.
    pub fn fail_always(&self, command: Command, description: &str) {
        lock(&self.state).faults.insert(
            command,
            FaultRule {
                countdown: None,
                description: description.to_string(),
            },
        );
    }

    pub fn clear_faults(&self) {
        lock(&self.state).faults.clear();
    }

    /// Queue outcomes for upcoming `CheckDocumentClosed` polls.
    pub fn script_check_closed(&self, outcomes: impl IntoIterator<Item = CheckOutcome>) {
        lock(&self.state).check_script.extend(outcomes);
    }

    /// Outcome once the script is exhausted.
    pub fn set_check_fallback(&self, outcome: CheckOutcome) {
        lock(&self.state).check_fallback = outcome;
    }

    /// Queue outcomes for upcoming `ContinuePrint` calls (`true` = success).
    pub fn script_continue_print(&self, outcomes: impl IntoIterator<Item = bool>) {
        lock(&self.state).continue_script.extend(outcomes);
    }

    pub fn set_continue_fallback(&self, ok: bool) {
        lock(&self.state).continue_fallback = ok;
    }

    // -- inspection -------------------------------------------------------

    /// Every command executed so far, failed ones included.
    pub fn journal(&self) -> Vec<Command> {
        lock(&self.state).journal.clone()
    }

    pub fn count(&self, command: Command) -> usize {
        lock(&self.state)
            .journal
            .iter()
            .filter(|c| **c == command)
            .count()
    }

    /// Number of report executions of any type.
    pub fn report_calls(&self) -> usize {
        lock(&self.state)
            .journal
            .iter()
            .filter(|c| matches!(c, Command::Report(_)))
            .count()
    }

    pub fn clear_journal(&self) {
        lock(&self.state).journal.clear();
    }

    pub fn printed(&self) -> Vec<String> {
        lock(&self.state).printed.clone()
    }

    pub fn reports(&self) -> Vec<ReportType> {
        lock(&self.state).reports.clone()
    }

    pub fn receipt_open(&self) -> bool {
        lock(&self.state).receipt.is_some()
    }

    pub fn open_receipt_items(&self) -> Vec<RecordedItem> {
        lock(&self.state)
            .receipt
            .as_ref()
            .map(|r| r.items.clone())
            .unwrap_or_default()
    }

    pub fn closed_receipts(&self) -> Vec<ClosedReceipt> {
        lock(&self.state).closed_receipts.clone()
    }

    pub fn shift_state(&self) -> ShiftState {
        lock(&self.state).shift_state
    }

    pub fn cash_sum(&self) -> f64 {
        lock(&self.state).cash_sum
    }

    pub fn last_settings(&self) -> HashMap<Setting, String> {
        lock(&self.state).last_settings.clone()
    }

    pub fn operator(&self) -> Option<String> {
        lock(&self.state).operator.clone()
    }
}

// ---------------------------------------------------------------------------
// EmulatedDriver
// ---------------------------------------------------------------------------

/// One session's handle onto an [`EmulatedDevice`].
pub struct EmulatedDriver {
    state: Arc<Mutex<DeviceState>>,
    settings: HashMap<Setting, String>,
    params: HashMap<Param, ParamValue>,
    opened: bool,
    error: Option<(i32, String)>,
}

impl EmulatedDriver {
    fn output(&mut self, key: Param, value: impl Into<ParamValue>) {
        self.params.insert(key, value.into());
    }

    fn input_string(&self, key: Param) -> String {
        self.param_string(key)
    }

    fn take_tag(&mut self, tag: u16) -> Option<ParamValue> {
        self.params.remove(&Param::Tag(tag))
    }

    fn run(&mut self, command: Command) -> Result<(), String> {
        let state = Arc::clone(&self.state);
        let mut s = lock(&state);
        s.journal.push(command);

        if let Some(description) = s.take_fault(command) {
            return Err(description);
        }

        match command {
            Command::Open => {
                if self.settings.get(&Setting::Port).map(String::as_str) != Some(PORT_COM) {
                    return Err("Unsupported port".into());
                }
                self.opened = s.available;
                Ok(())
            }
            Command::Close => {
                self.opened = false;
                Ok(())
            }
            _ if !self.opened => Err("Connection not established".into()),
            Command::QueryData(data) => {
                drop(s);
                self.query_data(data);
                Ok(())
            }
            Command::FnQueryData(data) => {
                drop(s);
                self.fn_query_data(data);
                Ok(())
            }
            Command::Report(report) => self.report(&mut s, report),
            Command::OperatorLogin => {
                let name = self.param_string(Param::Tag(tags::OPERATOR_NAME));
                if name.is_empty() {
                    return Err("Operator name required".into());
                }
                s.operator = Some(name);
                Ok(())
            }
            Command::OpenReceipt => {
                if s.receipt.is_some() {
                    return Err("Receipt already opened".into());
                }
                if s.nonfiscal_open {
                    return Err("Non-fiscal document opened".into());
                }
                let receipt_type = ReceiptType::from_code(self.param_int(Param::ReceiptType));
                if receipt_type == ReceiptType::Closed {
                    return Err("Invalid receipt type".into());
                }
                s.ensure_shift_open()?;
                let mut captured = HashMap::new();
                for tag in RECEIPT_TAGS {
                    if let Some(v) = self.take_tag(tag) {
                        captured.insert(tag, v);
                    }
                }
                s.receipt = Some(OpenReceipt {
                    receipt_type,
                    electronically: self.param_bool(Param::ReceiptElectronically),
                    items: Vec::new(),
                    payments: Vec::new(),
                    tags: captured,
                });
                Ok(())
            }
            Command::Registration => {
                let item = RecordedItem {
                    name: self.input_string(Param::CommodityName),
                    price: self.param_f64(Param::Price),
                    quantity: self.param_f64(Param::Quantity),
                    unit: self.param_int(Param::MeasurementUnit),
                    tax: self.param_int(Param::TaxType),
                };
                let receipt = s.receipt.as_mut().ok_or("Receipt not opened")?;
                if item.name.is_empty() {
                    return Err("Commodity name required".into());
                }
                receipt.items.push(item);
                Ok(())
            }
            Command::Payment => {
                let payment_type = self.param_int(Param::PaymentType);
                let add_info = payment_type == PaymentType::ADD_INFO_CODE;
                let payment = RecordedPayment {
                    payment_type,
                    sum: self.param_f64(Param::PaymentSum),
                    method: add_info.then(|| self.param_int(Param::ElectronicallyPaymentMethod)),
                    id: add_info.then(|| self.param_string(Param::ElectronicallyId)),
                    add_info: self
                        .param(Param::ElectronicallyAddInfo)
                        .filter(|_| add_info)
                        .and_then(|v| match v {
                            ParamValue::Str(s) => Some(s),
                            _ => None,
                        }),
                };
                let receipt = s.receipt.as_mut().ok_or("Receipt not opened")?;
                receipt.payments.push(payment);
                if !add_info {
                    let paid = receipt.paid();
                    let total = receipt.total();
                    self.output(Param::Remainder, (total - paid).max(0.0));
                    self.output(Param::Change, (paid - total).max(0.0));
                }
                Ok(())
            }
            Command::CloseReceipt => {
                let default_type = self.param_int(Param::PaymentType);
                let mut receipt = s.receipt.take().ok_or("Receipt not opened")?;
                if receipt.items.is_empty() {
                    s.receipt = Some(receipt);
                    return Err("Receipt has no items".into());
                }
                let total = receipt.total();
                let remainder = total - receipt.paid();
                if remainder > 0.005 {
                    receipt.payments.push(RecordedPayment {
                        payment_type: default_type,
                        sum: remainder,
                        method: None,
                        id: None,
                        add_info: None,
                    });
                }
                let cash: f64 = receipt
                    .payments
                    .iter()
                    .filter(|p| p.payment_type == PaymentType::Cash.code())
                    .map(|p| p.sum)
                    .sum::<f64>()
                    .min(total);
                let document_type = match receipt.receipt_type {
                    ReceiptType::SellReturn => {
                        s.cash_sum -= cash;
                        s.sell_return_cash_sum += cash;
                        DocumentType::ReceiptSellReturn
                    }
                    _ => {
                        s.cash_sum += cash;
                        s.sell_cash_sum += cash;
                        DocumentType::ReceiptSell
                    }
                };
                s.receipt_number += 1;
                s.documents_in_shift += 1;
                s.last_receipt_sum = total;
                let document_number = s.seal(document_type);
                s.closed_receipts.push(ClosedReceipt {
                    receipt_type: receipt.receipt_type,
                    electronically: receipt.electronically,
                    items: receipt.items,
                    payments: receipt.payments,
                    tags: receipt.tags,
                    total,
                    document_number,
                });
                Ok(())
            }
            Command::CancelReceipt => {
                if s.receipt.take().is_none() {
                    return Err("Receipt not opened".into());
                }
                Ok(())
            }
            Command::CashIncome => {
                let sum = self.param_f64(Param::Sum);
                s.ensure_shift_open()?;
                s.cash_sum += sum;
                s.cash_in_sum += sum;
                s.cash_in_count += 1;
                s.documents_in_shift += 1;
                s.seal(DocumentType::DocumentService);
                Ok(())
            }
            Command::CashOutcome => {
                let sum = self.param_f64(Param::Sum);
                if sum > s.cash_sum + 0.005 {
                    return Err("Not enough cash in drawer".into());
                }
                s.ensure_shift_open()?;
                s.cash_sum -= sum;
                s.cash_out_sum += sum;
                s.cash_out_count += 1;
                s.documents_in_shift += 1;
                s.seal(DocumentType::DocumentService);
                Ok(())
            }
            Command::CheckDocumentClosed => {
                let outcome = s.check_script.pop_front().unwrap_or(s.check_fallback);
                match outcome {
                    CheckOutcome::Error => Err("Document closing check failed".into()),
                    CheckOutcome::Done { closed, printed } => {
                        self.output(Param::DocumentClosed, closed);
                        self.output(Param::DocumentPrinted, printed);
                        Ok(())
                    }
                }
            }
            Command::ContinuePrint => {
                let ok = s.continue_script.pop_front().unwrap_or(s.continue_fallback);
                if ok {
                    Ok(())
                } else {
                    Err("Printing not finished".into())
                }
            }
            Command::PrintText => {
                let text = self.input_string(Param::Text);
                s.printed.push(text);
                Ok(())
            }
            Command::PrintCliche => {
                s.printed.push("[cliche]".into());
                Ok(())
            }
            Command::BeginNonfiscalDocument => {
                if s.receipt.is_some() {
                    return Err("Receipt opened".into());
                }
                s.nonfiscal_open = true;
                Ok(())
            }
            Command::EndNonfiscalDocument => {
                if !s.nonfiscal_open {
                    return Err("Non-fiscal document not opened".into());
                }
                s.nonfiscal_open = false;
                if self.param_bool(Param::PrintFooter) {
                    s.printed.push("[footer]".into());
                }
                Ok(())
            }
            Command::UtilFormTlv => {
                let mut packed = Vec::new();
                for tag in PACKABLE_TAGS {
                    if let Some(ParamValue::Str(value)) = self.take_tag(tag) {
                        let bytes = value.into_bytes();
                        packed.extend_from_slice(&tag.to_le_bytes());
                        packed.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
                        packed.extend_from_slice(&bytes);
                    }
                }
                if packed.is_empty() {
                    return Err("No attributes to pack".into());
                }
                self.output(Param::TagValue, packed);
                Ok(())
            }
        }
    }

    fn report(&mut self, s: &mut DeviceState, report: ReportType) -> Result<(), String> {
        if s.receipt.is_some() {
            return Err("Receipt opened".into());
        }
        match report {
            ReportType::CloseShift => {
                if s.shift_state == ShiftState::Closed {
                    return Err("Shift closed".into());
                }
                s.shift_state = ShiftState::Closed;
                s.shift_opened_at = None;
                s.seal(DocumentType::CloseShift);
            }
            ReportType::OfdExchangeStatus => {
                s.seal(DocumentType::OfdExchangeStatus);
            }
            _ => {}
        }
        s.reports.push(report);
        Ok(())
    }

    fn query_data(&mut self, data: DataType) {
        let state = Arc::clone(&self.state);
        let s = lock(&state);
        match data {
            DataType::SerialNumber => self.output(Param::SerialNumber, s.serial_number.clone()),
            DataType::ReceiptLineLength => {
                self.output(Param::ReceiptLineLength, s.line_length);
                self.output(Param::ReceiptLineLengthPix, s.line_length.max(0) * 12);
            }
            DataType::Status => {
                let receipt = s.receipt.as_ref();
                self.output(Param::DateTime, now());
                self.output(Param::ModelName, s.model_name.clone());
                self.output(Param::Model, 99i64);
                self.output(Param::SerialNumber, s.serial_number.clone());
                self.output(Param::ReceiptSum, receipt.map(|r| r.total()).unwrap_or(0.0));
                self.output(Param::DocumentNumber, i64::from(s.document_number));
                self.output(Param::DocumentType, s.last_document_type.code());
                self.output(Param::LogicalNumber, 1i64);
                self.output(Param::Mode, if receipt.is_some() { 1i64 } else { 0i64 });
                self.output(Param::SubMode, 0i64);
                self.output(Param::OperatorId, 1i64);
                self.output(Param::OperatorRegistered, s.operator.is_some());
                self.output(Param::ReceiptLineLength, s.line_length);
                self.output(Param::ReceiptLineLengthPix, s.line_length.max(0) * 12);
                self.output(Param::ReceiptNumber, i64::from(s.receipt_number));
                self.output(
                    Param::ReceiptType,
                    receipt.map(|r| r.receipt_type).unwrap_or_default().code(),
                );
                self.output(Param::ShiftNumber, i64::from(s.shift_number));
                self.output(Param::ShiftState, s.shift_state.code());
                self.output(Param::Fiscal, true);
                self.output(Param::FnFiscal, true);
                self.output(Param::FnPresent, true);
                self.output(Param::ReceiptPaperPresent, true);
                for flag in [
                    Param::Blocked,
                    Param::CashDrawerOpened,
                    Param::CoverOpened,
                    Param::CutError,
                    Param::InvalidFn,
                    Param::PaperNearEnd,
                    Param::PrinterConnectionLost,
                    Param::PrinterError,
                    Param::PrinterOverheat,
                ] {
                    self.output(flag, false);
                }
            }
            DataType::ShiftState => {
                self.output(Param::ShiftState, s.shift_state.code());
                self.output(Param::ShiftNumber, i64::from(s.shift_number));
                if let Some(opened) = s.shift_opened_at {
                    self.output(Param::DateTime, opened + ChronoDuration::hours(24));
                } else {
                    self.params.remove(&Param::DateTime);
                }
            }
            DataType::ReceiptState => {
                let receipt = s.receipt.as_ref();
                let total = receipt.map(|r| r.total()).unwrap_or(0.0);
                let paid = receipt.map(|r| r.paid()).unwrap_or(0.0);
                self.output(
                    Param::ReceiptType,
                    receipt.map(|r| r.receipt_type).unwrap_or_default().code(),
                );
                self.output(Param::ReceiptNumber, i64::from(s.receipt_number + 1));
                self.output(Param::DocumentNumber, i64::from(s.document_number + 1));
                self.output(Param::ReceiptSum, total);
                self.output(Param::Remainder, (total - paid).max(0.0));
                self.output(Param::Change, (paid - total).max(0.0));
            }
            DataType::PaymentSum => {
                let cash = self.param_int(Param::PaymentType) == PaymentType::Cash.code();
                let sum = match ReceiptType::from_code(self.param_int(Param::ReceiptType)) {
                    ReceiptType::Sell if cash => s.sell_cash_sum,
                    ReceiptType::SellReturn if cash => s.sell_return_cash_sum,
                    _ => 0.0,
                };
                self.output(Param::Sum, sum);
            }
            DataType::CashInSum => self.output(Param::Sum, s.cash_in_sum),
            DataType::CashOutSum => self.output(Param::Sum, s.cash_out_sum),
            DataType::CashInCount => self.output(Param::DocumentsCount, i64::from(s.cash_in_count)),
            DataType::CashOutCount => {
                self.output(Param::DocumentsCount, i64::from(s.cash_out_count))
            }
            DataType::CashSum => self.output(Param::Sum, s.cash_sum),
            DataType::LastSentOfdDocumentDateTime => {
                if let Some(at) = s.last_document_at {
                    self.output(Param::DateTime, at);
                }
            }
            DataType::UnitVersion => {
                let unit = UnitType::from_code(self.param_int(Param::UnitType));
                let version = match unit {
                    Some(UnitType::Firmware) => "5.8.100",
                    Some(UnitType::Configuration) => "48.2.1",
                    Some(UnitType::Templates) => "1.4.0",
                    Some(UnitType::ControlUnit) => "2.0.7",
                    Some(UnitType::Boot) => "1.1.3",
                    None => "",
                };
                self.output(Param::UnitVersion, version);
                self.output(Param::UnitReleaseVersion, "7781");
            }
        }
    }

    fn fn_query_data(&mut self, data: FnDataType) {
        let state = Arc::clone(&self.state);
        let s = lock(&state);
        match data {
            FnDataType::Shift => {
                self.output(Param::ReceiptNumber, i64::from(s.receipt_number));
                self.output(
                    Param::ShiftNumber,
                    i64::from(s.shift_number + s.fn_shift_offset),
                );
            }
            FnDataType::DocumentsCountInShift => {
                self.output(Param::DocumentsCount, i64::from(s.documents_in_shift))
            }
            FnDataType::OfdExchangeStatus => {
                self.output(Param::OfdExchangeStatus, 0i64);
                self.output(Param::DocumentsCount, 0i64);
                self.output(Param::DocumentNumber, 0i64);
                self.output(Param::OfdMessageRead, false);
                self.params.remove(&Param::DateTime);
                if let Some(at) = s.last_document_at {
                    self.output(Param::LastSuccessfulOkp, at);
                }
            }
            FnDataType::FnInfo => {
                self.output(Param::SerialNumber, format!("99990{}", s.serial_number));
                self.output(Param::FnVersion, "fn v 2.19");
                self.output(Param::FnExecution, "FN-1.2");
                self.output(Param::FnType, 1i64);
                self.output(Param::FnState, 3i64);
                self.output(Param::FnFlags, 0i64);
                self.output(Param::FnContainsKeysUpdaterServerUri, false);
            }
            FnDataType::RegInfo => {
                self.output(Param::Tag(tags::FNS_URL), "www.nalog.gov.ru");
                self.output(Param::Tag(tags::ORGANIZATION_NAME), "Emulated Trading LLC");
                self.output(Param::Tag(tags::ORGANIZATION_VATIN), "7700000000");
                self.output(Param::Tag(tags::ORGANIZATION_ADDRESS), "1 Test street");
                self.output(Param::Tag(tags::REGISTRATION_NUMBER), "0000000001012345");
                self.output(Param::Tag(tags::TAXATION_TYPES), 1i64);
                self.output(Param::Tag(tags::FFD_VERSION), 120i64);
                self.output(Param::Tag(tags::INTERNET_SIGN), false);
            }
            FnDataType::LastRegistration => {
                self.output(Param::DocumentNumber, 1i64);
                self.output(Param::RegistrationsCount, 1i64);
            }
            FnDataType::LastReceipt => {
                let last = s.closed_receipts.last();
                self.output(
                    Param::DocumentNumber,
                    last.map(|r| i64::from(r.document_number)).unwrap_or(0),
                );
                self.output(Param::ReceiptSum, s.last_receipt_sum);
                self.output(Param::FiscalSign, if last.is_some() { "3836219047" } else { "" });
                if let Some(at) = s.last_document_at.filter(|_| last.is_some()) {
                    self.output(Param::DateTime, at);
                }
            }
            FnDataType::LastDocument => {
                self.output(Param::DocumentNumber, i64::from(s.document_number));
                self.output(
                    Param::FiscalSign,
                    if s.document_number > 0 { "1402871233" } else { "" },
                );
                if let Some(at) = s.last_document_at {
                    self.output(Param::DateTime, at);
                }
            }
            FnDataType::Errors => {
                self.output(Param::NetworkError, 0i64);
                self.output(Param::NetworkErrorText, NO_ERRORS);
                self.output(Param::OfdError, 0i64);
                self.output(Param::OfdErrorText, NO_ERRORS);
                self.output(Param::FnError, 0i64);
                self.output(Param::FnErrorText, NO_ERRORS);
                self.output(Param::DataForSendIsEmpty, true);
            }
            FnDataType::FfdVersions => {
                self.output(Param::DeviceFfdVersion, 120i64);
                self.output(Param::DeviceMinFfdVersion, 105i64);
                self.output(Param::DeviceMaxFfdVersion, 120i64);
                self.output(Param::FnFfdVersion, 120i64);
                self.output(Param::FnMaxFfdVersion, 120i64);
                self.output(Param::FfdVersion, 120i64);
            }
        }
    }
}

impl FiscalDriver for EmulatedDriver {
    fn name(&self) -> &str {
        "emulator"
    }

    fn set_setting(&mut self, key: Setting, value: &str) {
        self.settings.insert(key, value.to_string());
    }

    fn apply_settings(&mut self) -> i32 {
        let mut s = lock(&self.state);
        s.last_settings = self.settings.clone();
        if s.apply_settings_result < 0 {
            self.error = Some((s.apply_settings_result, "Invalid settings".into()));
        }
        s.apply_settings_result
    }

    fn set_param(&mut self, key: Param, value: ParamValue) {
        self.params.insert(key, value);
    }

    fn param(&self, key: Param) -> Option<ParamValue> {
        self.params.get(&key).cloned()
    }

    fn execute(&mut self, command: Command) -> Status {
        match self.run(command) {
            Ok(()) => Ok(()),
            Err(description) => {
                self.error = Some((ERR_GENERIC, description));
                Err(ERR_GENERIC)
            }
        }
    }

    fn is_opened(&self) -> bool {
        self.opened
    }

    fn error_description(&self) -> String {
        self.error
            .as_ref()
            .map(|(_, d)| d.clone())
            .unwrap_or_else(|| NO_ERRORS.to_string())
    }

    fn reset_error(&mut self) {
        self.error = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

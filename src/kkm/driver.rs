//! Fiscal driver seam.
//!
//! The vendor driver is a stateful handle: inputs are staged as parameters,
//! a named command is executed, and outputs are read back as parameters. A
//! failing command reports a negative status and leaves a description behind
//! until `reset_error()` is called.
//!
//! Key design goals:
//! - **Closed vocabulary**: commands, settings and parameters are enums, so a
//!   session can only ask for what the gateway knows how to interpret
//! - **Typed reads**: `param_*` helpers return neutral values for anything the
//!   driver did not fill, matching how the vendor API reports absent outputs
//! - **Swappable backend**: sessions hold a `Box<dyn FiscalDriver>` created by a
//!   [`DriverFactory`]; the bundled backend is the in-memory emulator

use chrono::NaiveDateTime;
use std::sync::Arc;

/// Non-negative on success; negative driver error code on failure.
pub type Status = Result<(), i32>;

// ---------------------------------------------------------------------------
// Settings (applied before open)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Setting {
    Model,
    Port,
    ComFile,
    BaudRate,
    OfdChannel,
    TimeZone,
}

/// Value for `Setting::Model` / `Setting::OfdChannel` meaning "detect".
pub const SETTING_AUTO: &str = "auto";

/// Value for `Setting::Port` selecting the serial line transport.
pub const PORT_COM: &str = "com";

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Driver parameters used by the gateway, inputs and outputs alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param {
    // Receipts and items
    ReceiptType,
    ReceiptElectronically,
    DocumentElectronically,
    CommodityName,
    Price,
    Quantity,
    MeasurementUnit,
    TaxType,
    PaymentType,
    PaymentSum,
    Sum,
    ElectronicallyPaymentMethod,
    ElectronicallyId,
    ElectronicallyAddInfo,

    // Text printing
    Text,
    Alignment,
    TextWrap,
    FontDoubleWidth,
    Defer,
    PrintFooter,

    // Query selectors
    UnitType,

    // Confirmation
    DocumentClosed,
    DocumentPrinted,

    // TLV helper output
    TagValue,

    // Status outputs
    SerialNumber,
    ReceiptLineLength,
    ReceiptLineLengthPix,
    DateTime,
    ModelName,
    Model,
    Mode,
    SubMode,
    LogicalNumber,
    OperatorId,
    OperatorRegistered,
    DocumentNumber,
    DocumentType,
    DocumentsCount,
    ReceiptNumber,
    ReceiptSum,
    ShiftNumber,
    ShiftState,
    Remainder,
    Change,
    Blocked,
    CashDrawerOpened,
    CoverOpened,
    CutError,
    Fiscal,
    FnFiscal,
    FnPresent,
    InvalidFn,
    PaperNearEnd,
    PrinterConnectionLost,
    PrinterError,
    PrinterOverheat,
    ReceiptPaperPresent,

    // Fiscal storage outputs
    OfdExchangeStatus,
    OfdMessageRead,
    LastSuccessfulOkp,
    FnVersion,
    FnExecution,
    FnType,
    FnState,
    FnFlags,
    FnNeedReplacement,
    FnResourceExhausted,
    FnMemoryOverflow,
    FnOfdTimeout,
    FnCriticalError,
    FnContainsKeysUpdaterServerUri,
    FnKeysUpdaterServerUri,
    RegistrationsCount,
    FiscalSign,
    NetworkError,
    NetworkErrorText,
    OfdError,
    OfdErrorText,
    FnError,
    FnErrorText,
    CommandCode,
    DataForSendIsEmpty,
    DeviceFfdVersion,
    DeviceMinFfdVersion,
    DeviceMaxFfdVersion,
    FnFfdVersion,
    FnMaxFfdVersion,
    FfdVersion,
    UnitVersion,
    UnitReleaseVersion,
    TradeMarkedProducts,
    InsuranceActivity,
    PawnShopActivity,
    Vending,
    Catering,
    Wholesale,

    /// Numbered fiscal attribute (operator name 1021, customer info 1256, ...).
    Tag(u16),
}

/// Fiscal attribute numbers used by the gateway.
pub mod tags {
    pub const CUSTOMER_CONTACT: u16 = 1008;
    pub const ORGANIZATION_ADDRESS: u16 = 1009;
    pub const OFD_VATIN: u16 = 1017;
    pub const ORGANIZATION_VATIN: u16 = 1018;
    pub const OPERATOR_NAME: u16 = 1021;
    pub const MACHINE_NUMBER: u16 = 1036;
    pub const REGISTRATION_NUMBER: u16 = 1037;
    pub const OFD_NAME: u16 = 1046;
    pub const ORGANIZATION_NAME: u16 = 1048;
    pub const FNS_URL: u16 = 1060;
    pub const TAXATION_TYPES: u16 = 1062;
    pub const AGENT_SIGN: u16 = 1057;
    pub const USER_ATTRIBUTE: u16 = 1084;
    pub const USER_ATTRIBUTE_NAME: u16 = 1085;
    pub const USER_ATTRIBUTE_VALUE: u16 = 1086;
    pub const SELLER_EMAIL: u16 = 1117;
    pub const PAYMENTS_ADDRESS: u16 = 1187;
    pub const OPERATOR_INN: u16 = 1203;
    pub const FFD_VERSION: u16 = 1209;
    pub const CUSTOMER_NAME: u16 = 1227;
    pub const CUSTOMER_INN: u16 = 1228;
    pub const CUSTOMER_BIRTHDATE: u16 = 1243;
    pub const CUSTOMER_CITIZENSHIP: u16 = 1244;
    pub const CUSTOMER_DOCUMENT_CODE: u16 = 1245;
    pub const CUSTOMER_DOCUMENT_DATA: u16 = 1246;
    pub const CUSTOMER_ADDRESS: u16 = 1254;
    pub const CUSTOMER_INFO: u16 = 1256;
    pub const AUTO_MODE_SIGN: u16 = 1001;
    pub const OFFLINE_MODE_SIGN: u16 = 1002;
    pub const ENCRYPTION_SIGN: u16 = 1056;
    pub const INTERNET_SIGN: u16 = 1108;
    pub const SERVICE_SIGN: u16 = 1109;
    pub const BSO_SIGN: u16 = 1110;
    pub const LOTTERY_SIGN: u16 = 1126;
    pub const GAMBLING_SIGN: u16 = 1193;
    pub const EXCISE_SIGN: u16 = 1207;
    pub const MACHINE_INSTALLATION_SIGN: u16 = 1221;
}

/// Alignment values for `Param::Alignment`.
pub const ALIGNMENT_CENTER: i64 = 1;

/// Word wrapping for `Param::TextWrap`.
pub const TEXT_WRAP_WORDS: i64 = 1;

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Bytes(Vec<u8>),
    DateTime(NaiveDateTime),
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Double(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

impl From<Vec<u8>> for ParamValue {
    fn from(v: Vec<u8>) -> Self {
        ParamValue::Bytes(v)
    }
}

impl From<NaiveDateTime> for ParamValue {
    fn from(v: NaiveDateTime) -> Self {
        ParamValue::DateTime(v)
    }
}

// ---------------------------------------------------------------------------
// Query selectors
// ---------------------------------------------------------------------------

/// Device-side data for `Command::QueryData`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Status,
    SerialNumber,
    ReceiptLineLength,
    ShiftState,
    ReceiptState,
    /// Payment sum filtered by `Param::PaymentType` and `Param::ReceiptType`.
    PaymentSum,
    CashInSum,
    CashOutSum,
    CashInCount,
    CashOutCount,
    CashSum,
    LastSentOfdDocumentDateTime,
    /// Version of the unit selected by `Param::UnitType`.
    UnitVersion,
}

/// Unit selector for `DataType::UnitVersion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitType {
    Firmware,
    Configuration,
    Templates,
    ControlUnit,
    Boot,
}

impl UnitType {
    pub fn code(self) -> i64 {
        match self {
            UnitType::Firmware => 0,
            UnitType::Configuration => 1,
            UnitType::Templates => 2,
            UnitType::ControlUnit => 3,
            UnitType::Boot => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(UnitType::Firmware),
            1 => Some(UnitType::Configuration),
            2 => Some(UnitType::Templates),
            3 => Some(UnitType::ControlUnit),
            4 => Some(UnitType::Boot),
            _ => None,
        }
    }
}

/// Fiscal-storage data for `Command::FnQueryData`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FnDataType {
    Shift,
    DocumentsCountInShift,
    OfdExchangeStatus,
    FnInfo,
    RegInfo,
    LastRegistration,
    LastReceipt,
    LastDocument,
    Errors,
    FfdVersions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportType {
    X,
    CloseShift,
    KktDemo,
    KktInfo,
    FnRegistrations,
    OfdExchangeStatus,
    OfdTest,
    CloseShiftReports,
    LastDocument,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Open,
    Close,
    QueryData(DataType),
    FnQueryData(FnDataType),
    Report(ReportType),
    OperatorLogin,
    OpenReceipt,
    CloseReceipt,
    CancelReceipt,
    Registration,
    Payment,
    CashIncome,
    CashOutcome,
    CheckDocumentClosed,
    ContinuePrint,
    PrintText,
    PrintCliche,
    BeginNonfiscalDocument,
    EndNonfiscalDocument,
    /// Packs the staged tag parameters into `Param::TagValue`.
    UtilFormTlv,
}

// ---------------------------------------------------------------------------
// Driver trait
// ---------------------------------------------------------------------------

/// One stateful driver handle. Not shared between sessions.
pub trait FiscalDriver: Send {
    /// Backend name (for logging).
    fn name(&self) -> &str;

    fn set_setting(&mut self, key: Setting, value: &str);

    /// Commit staged settings. Negative on failure.
    fn apply_settings(&mut self) -> i32;

    fn set_param(&mut self, key: Param, value: ParamValue);

    fn param(&self, key: Param) -> Option<ParamValue>;

    fn execute(&mut self, command: Command) -> Status;

    fn is_opened(&self) -> bool;

    fn error_description(&self) -> String;

    fn reset_error(&mut self);

    fn param_bool(&self, key: Param) -> bool {
        match self.param(key) {
            Some(ParamValue::Bool(v)) => v,
            Some(ParamValue::Int(v)) => v != 0,
            _ => false,
        }
    }

    fn param_int(&self, key: Param) -> i64 {
        match self.param(key) {
            Some(ParamValue::Int(v)) => v,
            Some(ParamValue::Bool(v)) => i64::from(v),
            Some(ParamValue::Double(v)) => v as i64,
            _ => 0,
        }
    }

    fn param_u32(&self, key: Param) -> u32 {
        u32::try_from(self.param_int(key)).unwrap_or(0)
    }

    fn param_f64(&self, key: Param) -> f64 {
        match self.param(key) {
            Some(ParamValue::Double(v)) => v,
            Some(ParamValue::Int(v)) => v as f64,
            _ => 0.0,
        }
    }

    fn param_string(&self, key: Param) -> String {
        match self.param(key) {
            Some(ParamValue::Str(v)) => v,
            _ => String::new(),
        }
    }

    fn param_bytes(&self, key: Param) -> Vec<u8> {
        match self.param(key) {
            Some(ParamValue::Bytes(v)) => v,
            _ => Vec::new(),
        }
    }

    fn param_datetime(&self, key: Param) -> Option<NaiveDateTime> {
        match self.param(key) {
            Some(ParamValue::DateTime(v)) => Some(v),
            _ => None,
        }
    }
}

/// Creates a fresh driver handle for each session.
pub type DriverFactory = Arc<dyn Fn() -> Box<dyn FiscalDriver> + Send + Sync>;

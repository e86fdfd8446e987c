//! Operation results and the merged JSON answer.
//!
//! Every operation yields one [`OperationResult`]: a success flag, a message
//! and, for queries, a typed payload. Several results fold into one JSON
//! object with [`merge`], where a failure only ever downgrades the aggregate
//! and the first genuine failure message sticks.

use crate::kkm::error::KkmError;
use crate::kkm::types::{DocumentType, FfdVersion, ReceiptType, ShiftState};
use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

pub const SUCCESS_KEY: &str = "success";
pub const MESSAGE_KEY: &str = "message";
pub const OK: &str = "OK";

const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn date_time<S: Serializer>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(dt) => serializer.serialize_str(&dt.format(DATE_TIME_FORMAT).to_string()),
        None => serializer.serialize_none(),
    }
}

// ---------------------------------------------------------------------------
// OperationResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
    pub payload: Option<Payload>,
}

impl Default for OperationResult {
    fn default() -> Self {
        Self {
            success: true,
            message: OK.to_string(),
            payload: None,
        }
    }
}

impl OperationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            payload: None,
        }
    }

    pub fn with_payload(payload: Payload) -> Self {
        Self {
            payload: Some(payload),
            ..Self::default()
        }
    }

    /// Record a failure. Only the first failure is kept; returns whether this
    /// call recorded it.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if !self.success {
            return false;
        }
        self.success = false;
        self.message = message.into();
        true
    }

    /// Fold another result into this one under the same precedence as [`merge`].
    pub fn absorb(&mut self, other: OperationResult) {
        if !other.success {
            self.fail(other.message);
        }
    }
}

impl From<&KkmError> for OperationResult {
    fn from(e: &KkmError) -> Self {
        OperationResult::failed(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    #[serde(serialize_with = "date_time")]
    pub date_time: Option<NaiveDateTime>,
    pub model: u32,
    pub model_name: String,
    pub serial_number: String,
    pub logical_number: u32,
    pub mode: u32,
    pub sub_mode: u32,
    pub operator_id: u32,
    pub operator_registered: bool,
    pub document_number: u32,
    pub document_type: DocumentType,
    pub document_type_text: &'static str,
    pub receipt_number: u32,
    pub receipt_sum: f64,
    pub receipt_type: ReceiptType,
    pub receipt_type_text: &'static str,
    pub receipt_line_length: u32,
    pub receipt_line_length_pix: u32,
    pub shift_number: u32,
    pub shift_state: ShiftState,
    pub shift_state_text: &'static str,
    pub blocked: bool,
    pub cash_drawer_opened: bool,
    pub cover_opened: bool,
    pub cut_error: bool,
    pub fiscal: bool,
    pub fn_fiscal: bool,
    pub fn_present: bool,
    pub invalid_fn: bool,
    pub paper_near_end: bool,
    pub printer_connection_lost: bool,
    pub printer_error: bool,
    pub printer_overheat: bool,
    pub receipt_paper_present: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftStatePayload {
    pub shift_state: ShiftState,
    pub shift_state_text: &'static str,
    pub shift_number: u32,
    #[serde(serialize_with = "date_time")]
    pub expired_at: Option<NaiveDateTime>,
    pub receipt_number: u32,
    pub documents_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptStatePayload {
    pub receipt_type: ReceiptType,
    pub receipt_type_text: &'static str,
    pub receipt_number: u32,
    pub document_number: u32,
    pub sum: f64,
    pub remainder: f64,
    pub change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashStatPayload {
    pub sell_cash_sum: f64,
    pub sell_return_cash_sum: f64,
    pub cash_sum: f64,
    pub cash_in_sum: f64,
    pub cash_out_sum: f64,
    pub cash_in_count: u32,
    pub cash_out_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfdExchangeStatusPayload {
    pub exchange_status: u32,
    pub unsent_count: u32,
    pub first_unsent_number: u32,
    pub ofd_message_read: bool,
    #[serde(serialize_with = "date_time")]
    pub first_unsent_date_time: Option<NaiveDateTime>,
    #[serde(serialize_with = "date_time")]
    pub okp_date_time: Option<NaiveDateTime>,
    #[serde(serialize_with = "date_time")]
    pub last_sent_date_time: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FnInfoPayload {
    pub serial: String,
    pub version: String,
    pub execution: String,
    #[serde(rename = "type")]
    pub fn_type: u32,
    pub state: u32,
    pub flags: u32,
    pub need_replacement: bool,
    pub exhausted: bool,
    pub memory_overflow: bool,
    pub ofd_timeout: bool,
    pub critical_error: bool,
    pub keys_updater_server_uri: String,
}

/// Taxation systems, decoded from the registration bit mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxationTypes {
    pub osn: bool,
    pub usn_income: bool,
    pub usn_income_outcome: bool,
    pub esn: bool,
    pub patent: bool,
}

impl TaxationTypes {
    pub fn from_mask(mask: u32) -> Self {
        Self {
            osn: mask & 0x01 != 0,
            usn_income: mask & 0x02 != 0,
            usn_income_outcome: mask & 0x04 != 0,
            esn: mask & 0x10 != 0,
            patent: mask & 0x20 != 0,
        }
    }
}

/// Agent kinds, decoded from the registration bit mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSign {
    pub bank_paying_agent: bool,
    pub bank_paying_subagent: bool,
    pub paying_agent: bool,
    pub paying_subagent: bool,
    pub attorney: bool,
    pub commission_agent: bool,
    pub another: bool,
}

impl AgentSign {
    pub fn from_mask(mask: u32) -> Self {
        Self {
            bank_paying_agent: mask & 0x01 != 0,
            bank_paying_subagent: mask & 0x02 != 0,
            paying_agent: mask & 0x04 != 0,
            paying_subagent: mask & 0x08 != 0,
            attorney: mask & 0x10 != 0,
            commission_agent: mask & 0x20 != 0,
            another: mask & 0x40 != 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationInfoPayload {
    pub fns_url: String,
    pub organization_address: String,
    #[serde(rename = "organizationVATIN")]
    pub organization_vatin: String,
    pub organization_name: String,
    pub organization_email: String,
    pub payments_address: String,
    pub registration_number: String,
    pub machine_number: String,
    #[serde(rename = "ofdVATIN")]
    pub ofd_vatin: String,
    pub ofd_name: String,
    pub taxation_types: TaxationTypes,
    pub agent_sign: AgentSign,
    pub ffd_version: FfdVersion,
    pub auto_mode_sign: bool,
    pub offline_mode_sign: bool,
    pub encryption_sign: bool,
    pub internet_sign: bool,
    pub service_sign: bool,
    pub bso_sign: bool,
    pub lottery_sign: bool,
    pub gambling_sign: bool,
    pub excise_sign: bool,
    pub machine_installation_sign: bool,
    pub trade_marked_products: bool,
    pub insurance_activity: bool,
    pub pawn_shop_activity: bool,
    pub vending: bool,
    pub catering: bool,
    pub wholesale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastRegistrationPayload {
    pub document_number: u32,
    pub registrations_count: u32,
    #[serde(serialize_with = "date_time")]
    pub registration_date_time: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastReceiptPayload {
    pub document_number: u32,
    pub receipt_sum: f64,
    pub fiscal_sign: String,
    #[serde(serialize_with = "date_time")]
    pub document_date_time: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastDocumentPayload {
    pub document_number: u32,
    pub fiscal_sign: String,
    #[serde(serialize_with = "date_time")]
    pub document_date_time: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FndtErrorsPayload {
    pub network_error: u32,
    pub network_error_text: String,
    pub ofd_error: u32,
    pub ofd_error_text: String,
    pub fn_error: u32,
    pub fn_error_text: String,
    pub failed_document_number: u32,
    pub failed_command_code: u32,
    #[serde(serialize_with = "date_time")]
    pub success_date_time: Option<NaiveDateTime>,
    pub data_for_send_is_empty: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FfdVersionsPayload {
    pub device_ffd: FfdVersion,
    pub device_min_ffd: FfdVersion,
    pub device_max_ffd: FfdVersion,
    pub fn_ffd: FfdVersion,
    pub fn_max_ffd: FfdVersion,
    pub ffd: FfdVersion,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FwVersionsPayload {
    pub boot: String,
    pub configuration: String,
    pub control_unit: String,
    pub firmware: String,
    pub release: String,
    pub templates: String,
}

/// Typed payload of a successful query, attached under [`Payload::key`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Status(StatusPayload),
    ShiftState(ShiftStatePayload),
    ReceiptState(ReceiptStatePayload),
    CashStat(CashStatPayload),
    OfdExchangeStatus(OfdExchangeStatusPayload),
    FnInfo(FnInfoPayload),
    RegistrationInfo(Box<RegistrationInfoPayload>),
    LastRegistration(LastRegistrationPayload),
    LastReceipt(LastReceiptPayload),
    LastDocument(LastDocumentPayload),
    Errors(FndtErrorsPayload),
    FfdVersions(FfdVersionsPayload),
    FwVersions(FwVersionsPayload),
}

impl Payload {
    pub fn key(&self) -> &'static str {
        match self {
            Payload::Status(_) => "status",
            Payload::ShiftState(_) => "shiftState",
            Payload::ReceiptState(_) => "receiptState",
            Payload::CashStat(_) => "cashStat",
            Payload::OfdExchangeStatus(_) => "ofdExchangeStatus",
            Payload::FnInfo(_) => "fnInfo",
            Payload::RegistrationInfo(_) => "registrationInfo",
            Payload::LastRegistration(_) => "lastRegistration",
            Payload::LastReceipt(_) => "lastReceipt",
            Payload::LastDocument(_) => "lastDocument",
            Payload::Errors(_) => "fndtErrors",
            Payload::FfdVersions(_) => "ffdVersions",
            Payload::FwVersions(_) => "fwVersions",
        }
    }

    pub fn to_json(&self) -> Value {
        let value = match self {
            Payload::Status(p) => serde_json::to_value(p),
            Payload::ShiftState(p) => serde_json::to_value(p),
            Payload::ReceiptState(p) => serde_json::to_value(p),
            Payload::CashStat(p) => serde_json::to_value(p),
            Payload::OfdExchangeStatus(p) => serde_json::to_value(p),
            Payload::FnInfo(p) => serde_json::to_value(p),
            Payload::RegistrationInfo(p) => serde_json::to_value(p),
            Payload::LastRegistration(p) => serde_json::to_value(p),
            Payload::LastReceipt(p) => serde_json::to_value(p),
            Payload::LastDocument(p) => serde_json::to_value(p),
            Payload::Errors(p) => serde_json::to_value(p),
            Payload::FfdVersions(p) => serde_json::to_value(p),
            Payload::FwVersions(p) => serde_json::to_value(p),
        };
        value.unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Fold `result` into the aggregate `json` object. Returns the aggregate
/// success after the fold.
///
/// - `success` is overwritten when absent, not a bool, or currently `true`
///   while the result failed; overwriting it also overwrites `message`.
/// - Otherwise `message` is replaced only when absent, not a string, empty
///   or `"OK"`.
/// - The payload is attached only when both the aggregate and the result
///   are still successful.
pub fn merge(json: &mut Map<String, Value>, result: &OperationResult) -> bool {
    let current = json.get(SUCCESS_KEY).and_then(Value::as_bool);
    let override_success = match current {
        None => true,
        Some(aggregate) => aggregate && !result.success,
    };
    if override_success {
        json.insert(SUCCESS_KEY.into(), Value::Bool(result.success));
    }

    let placeholder = match json.get(MESSAGE_KEY) {
        Some(Value::String(m)) => m.is_empty() || m == OK,
        _ => true,
    };
    if override_success || placeholder {
        json.insert(MESSAGE_KEY.into(), Value::String(result.message.clone()));
    }

    let success = json
        .get(SUCCESS_KEY)
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if success && result.success {
        if let Some(payload) = &result.payload {
            json.insert(payload.key().into(), payload.to_json());
        }
    }
    success
}

/// Merge results in call order into a fresh object.
pub fn merge_all<'a>(results: impl IntoIterator<Item = &'a OperationResult>) -> Map<String, Value> {
    let mut json = Map::new();
    for result in results {
        merge(&mut json, result);
    }
    if json.is_empty() {
        merge(&mut json, &OperationResult::new());
    }
    json
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

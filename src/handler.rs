//! Call adapters.
//!
//! A [`Request`] names an action (`"<method>/kkm/<action>"`), an optional
//! device serial number and a JSON details object. [`Handler::handle`] parses
//! the details, opens one device session, runs the action and answers with a
//! single merged JSON object.
//!
//! Status codes follow the HTTP front end: unknown actions are 404, malformed
//! requests 400, and any error escaping a session is 500 with
//! `{"success": false, "message": ...}`. A device-level failure recorded in
//! the result is still a 200 answer with `success: false`.

use crate::kkm::details::{CashDetails, CloseDetails, PrintDetails, ReceiptDetails};
use crate::kkm::driver::DriverFactory;
use crate::kkm::result::{MESSAGE_KEY, SUCCESS_KEY};
use crate::kkm::{
    merge_all, ConnParams, Device, KkmConfig, KkmError, KnownConnParams, OperationResult,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Method::Get => "get",
            Method::Post => "post",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub id: Uuid,
    pub method: Method,
    /// `kkm/<action>`, leading and trailing slashes ignored.
    pub path: String,
    pub serial: Option<String>,
    pub details: Value,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            path: path.into(),
            serial: None,
            details: Value::Object(Map::new()),
        }
    }

    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    fn key(&self) -> String {
        format!("{}/{}", self.method.as_str(), self.path.trim_matches('/'))
    }

    fn log_prefix(&self) -> String {
        format!("Request [{}]: ", self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    pub fn success(&self) -> bool {
        self.body
            .get(SUCCESS_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    BaseStatus,
    Status,
    FullStatus,
    Learn,
    ResetRegistry,
    PrintDemo,
    PrintNonFiscalDocument,
    PrintInfo,
    PrintFnRegistrations,
    PrintOfdExchangeStatus,
    PrintOfdTest,
    PrintCloseShiftReports,
    PrintLastDocument,
    CashStat,
    CashIn,
    CashOut,
    Sell,
    SellReturn,
    ReportX,
    CloseShift,
    ResetState,
}

const ROUTES: [(&str, Action); 22] = [
    ("get/kkm/base-status", Action::BaseStatus),
    ("get/kkm/status", Action::Status),
    ("get/kkm/full-status", Action::FullStatus),
    ("post/kkm/learn", Action::Learn),
    ("post/kkm/reset-registry", Action::ResetRegistry),
    ("post/kkm/print-demo", Action::PrintDemo),
    ("post/kkm/print-non-fiscal-doc", Action::PrintNonFiscalDocument),
    ("post/kkm/print-info", Action::PrintInfo),
    ("post/kkm/print-fn-registrations", Action::PrintFnRegistrations),
    ("post/kkm/print-ofd-exchange-status", Action::PrintOfdExchangeStatus),
    ("post/kkm/print-ofd-test", Action::PrintOfdTest),
    ("post/kkm/print-close-shift-reports", Action::PrintCloseShiftReports),
    ("post/kkm/print-last-document", Action::PrintLastDocument),
    ("get/kkm/cash-stat", Action::CashStat),
    ("post/kkm/cash-in", Action::CashIn),
    ("post/kkm/cash-out", Action::CashOut),
    ("post/kkm/sell", Action::Sell),
    ("post/kkm/sell-return", Action::SellReturn),
    ("post/kkm/report-x", Action::ReportX),
    ("post/kkm/report-z", Action::CloseShift),
    ("post/kkm/close-shift", Action::CloseShift),
    ("post/kkm/reset-state", Action::ResetState),
];

impl Action {
    fn route(key: &str) -> Option<Self> {
        ROUTES
            .iter()
            .find(|(route, _)| *route == key)
            .map(|(_, action)| *action)
    }
}

/// Why a request produced no merged result.
#[derive(Debug, Error)]
enum Rejection {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Kkm(#[from] KkmError),
}

impl Rejection {
    fn status(&self) -> u16 {
        match self {
            Rejection::BadRequest(_) => 400,
            Rejection::NotFound(_) => 404,
            Rejection::Kkm(_) => 500,
        }
    }

    /// The caller sent something unusable; the device was not at fault.
    fn is_client_error(&self) -> bool {
        match self {
            Rejection::BadRequest(_) | Rejection::NotFound(_) => true,
            Rejection::Kkm(e) => e.is_validation(),
        }
    }
}

const BAD_REQUEST: &str = "Bad request";

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Dispatches requests to device sessions. Shared between request threads;
/// each request still drives its own session.
pub struct Handler {
    config: Arc<KkmConfig>,
    factory: DriverFactory,
    registry: Mutex<HashMap<String, Arc<KnownConnParams>>>,
}

impl Handler {
    pub fn new(config: Arc<KkmConfig>, factory: DriverFactory) -> Self {
        Self {
            config,
            factory,
            registry: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &KkmConfig {
        &self.config
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, Arc<KnownConnParams>>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn handle(&self, request: &Request) -> Response {
        let key = request.key();
        let Some(action) = Action::route(&key) else {
            warn!("{}Unknown action '{}'", request.log_prefix(), key);
            return Self::reject(Rejection::NotFound(format!("Unknown action '{key}'")));
        };
        debug!("{}{:?}", request.log_prefix(), action);

        match self.dispatch(action, request) {
            Ok(json) => Response {
                status: 200,
                body: Value::Object(json),
            },
            Err(rejection) => {
                if rejection.is_client_error() {
                    info!("{}Rejected: {}", request.log_prefix(), rejection);
                } else {
                    warn!("{}{}", request.log_prefix(), rejection);
                }
                Self::reject(rejection)
            }
        }
    }

    fn reject(rejection: Rejection) -> Response {
        let mut body = Map::new();
        body.insert(SUCCESS_KEY.into(), Value::Bool(false));
        body.insert(MESSAGE_KEY.into(), Value::String(rejection.to_string()));
        Response {
            status: rejection.status(),
            body: Value::Object(body),
        }
    }

    /// Descriptor learned for `serial`, from the cache or the registry files.
    fn known(&self, serial: &str) -> Result<Arc<KnownConnParams>, Rejection> {
        if let Some(known) = self.registry().get(serial) {
            return Ok(Arc::clone(known));
        }
        // Loaded without the lock; a record cached meanwhile wins.
        let loaded = KnownConnParams::load(serial, &self.config).map_err(|e| {
            debug!(serial, error = %e, "Descriptor not loaded");
            Rejection::NotFound(format!("KKM [{serial}] not found"))
        })?;
        let mut registry = self.registry();
        let known = registry
            .entry(serial.to_string())
            .or_insert_with(|| Arc::new(loaded));
        Ok(Arc::clone(known))
    }

    fn session(&self, request: &Request) -> Result<Device, Rejection> {
        let serial = request
            .serial
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Rejection::BadRequest(BAD_REQUEST.into()))?;
        let known = self.known(serial)?;
        let device = Device::connect_known(
            (self.factory)(),
            &known,
            Arc::clone(&self.config),
            request.log_prefix(),
        )?;
        Ok(device)
    }

    fn dispatch(&self, action: Action, request: &Request) -> Result<Map<String, Value>, Rejection> {
        let results = match action {
            Action::Learn => return self.learn(request),
            Action::ResetRegistry => {
                self.registry().clear();
                info!("{}Registry cleared", request.log_prefix());
                vec![OperationResult::new()]
            }

            Action::BaseStatus => vec![self.session(request)?.get_status()],
            Action::Status => {
                let mut kkm = self.session(request)?;
                vec![
                    kkm.get_status(),
                    kkm.get_shift_state(),
                    kkm.get_receipt_state(),
                    kkm.get_cash_stat(),
                    kkm.get_ofd_exchange_status(),
                    kkm.get_last_receipt(),
                    kkm.get_last_document(),
                    kkm.get_errors(),
                ]
            }
            Action::FullStatus => {
                let mut kkm = self.session(request)?;
                vec![
                    kkm.get_status(),
                    kkm.get_shift_state(),
                    kkm.get_receipt_state(),
                    kkm.get_cash_stat(),
                    kkm.get_ofd_exchange_status(),
                    kkm.get_fn_info(),
                    kkm.get_registration_info(),
                    kkm.get_last_registration(),
                    kkm.get_last_receipt(),
                    kkm.get_last_document(),
                    kkm.get_errors(),
                    kkm.get_ffd_version(),
                    kkm.get_fw_version(),
                ]
            }
            Action::CashStat => vec![self.session(request)?.get_cash_stat()],

            Action::PrintDemo => vec![self.session(request)?.print_demo()],
            Action::PrintInfo => vec![self.session(request)?.print_info()],
            Action::PrintFnRegistrations => vec![self.session(request)?.print_fn_registrations()],
            Action::PrintOfdExchangeStatus => {
                vec![self.session(request)?.print_ofd_exchange_status()]
            }
            Action::PrintOfdTest => vec![self.session(request)?.print_ofd_test()],
            Action::PrintCloseShiftReports => {
                vec![self.session(request)?.print_close_shift_reports()]
            }
            Action::PrintLastDocument => vec![self.session(request)?.print_last_document()],
            Action::PrintNonFiscalDocument => {
                let details = PrintDetails::from_json(&request.details)?;
                vec![self.session(request)?.print_non_fiscal_document(&details)?]
            }

            Action::CashIn => {
                let details = CashDetails::from_json(&request.details, &self.config)?;
                vec![self.session(request)?.register_cash_in(&details)?]
            }
            Action::CashOut => {
                let details = CashDetails::from_json(&request.details, &self.config)?;
                vec![self.session(request)?.register_cash_out(&details)?]
            }
            Action::Sell => {
                let details = ReceiptDetails::from_json(&request.details, &self.config)?;
                vec![self.session(request)?.register_sell(&details)?]
            }
            Action::SellReturn => {
                let details = ReceiptDetails::from_json(&request.details, &self.config)?;
                vec![self.session(request)?.register_sell_return(&details)?]
            }
            Action::ReportX => {
                let details = CloseDetails::from_json(&request.details)?;
                vec![self.session(request)?.report_x(&details)?]
            }
            Action::CloseShift => {
                let details = CloseDetails::from_json(&request.details)?;
                vec![self.session(request)?.close_shift(&details)?]
            }
            Action::ResetState => {
                let details = CloseDetails::from_json(&request.details)?;
                vec![self.session(request)?.reset_state(&details)?]
            }
        };
        Ok(merge_all(&results))
    }

    fn learn(&self, request: &Request) -> Result<Map<String, Value>, Rejection> {
        if request.serial.as_deref().is_some_and(|s| !s.is_empty()) {
            return Err(Rejection::BadRequest(BAD_REQUEST.into()));
        }
        let descriptor = request
            .details
            .get("connParams")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Rejection::BadRequest(KkmError::requires_property("connParams").to_string())
            })?;
        let status = self.learn_descriptor(descriptor, request.log_prefix())?;
        Ok(merge_all(&[status]))
    }

    /// Probe an unverified descriptor: connect, read the status, print the
    /// greeting and persist the descriptor under the reported serial number.
    pub fn learn_descriptor(
        &self,
        descriptor: &str,
        log_prefix: String,
    ) -> crate::kkm::Result<OperationResult> {
        let params = ConnParams::resolve(descriptor)?;
        let mut kkm = Device::connect(
            (self.factory)(),
            &params,
            Arc::clone(&self.config),
            log_prefix.clone(),
        )?;
        let serial = kkm.serial_number().to_string();
        self.registry().insert(
            serial.clone(),
            Arc::new(KnownConnParams::new(params.clone(), serial.clone())),
        );

        let status = kkm.get_status();
        kkm.print_hello()?;
        params.save(&serial, &self.config)?;
        info!("{}KKM [{}] learned via {}", log_prefix, serial, params);
        Ok(status)
    }
}

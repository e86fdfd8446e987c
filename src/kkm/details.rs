//! Operation inputs and their JSON parsing.
//!
//! Inputs are built once per request and never mutated afterwards. Parsing
//! validates the shared fields first (electronic flag, operator) and the
//! variant-specific ones second; the first invalid field aborts with
//! "Required valid property '<path>'" before any driver call.

use crate::kkm::config::{KkmConfig, MIN_CASH_IN_OUT, MIN_PRICE, MIN_QUANTITY};
use crate::kkm::error::{KkmError, Result};
use crate::kkm::types::{MeasurementUnit, PaymentType, Tax};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// JSON access helpers
// ---------------------------------------------------------------------------

static EMPTY: std::sync::OnceLock<Map<String, Value>> = std::sync::OnceLock::new();

/// A JSON object plus its property path, for error messages.
struct Scope<'a> {
    json: &'a Map<String, Value>,
    path: Option<String>,
}

impl<'a> Scope<'a> {
    fn root(value: &'a Value) -> Result<Self> {
        let json = match value {
            Value::Object(map) => map,
            Value::Null => EMPTY.get_or_init(Map::new),
            _ => {
                return Err(KkmError::Validation(
                    "Request details must be a JSON object".into(),
                ))
            }
        };
        Ok(Self { json, path: None })
    }

    fn invalid(&self, key: &str) -> KkmError {
        match &self.path {
            Some(parent) => KkmError::requires_property2(parent, key),
            None => KkmError::requires_property(key),
        }
    }

    fn child_path(&self, key: &str) -> String {
        match &self.path {
            Some(parent) => format!("{parent}.{key}"),
            None => key.to_string(),
        }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.json.get(key).filter(|v| !v.is_null())
    }

    fn flag(&self, key: &str) -> Result<bool> {
        match self.get(key) {
            None => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(self.invalid(key)),
        }
    }

    /// String of `min..=max` characters, optionally trimmed first.
    fn text(&self, key: &str, min: usize, max: usize, trim: bool) -> Result<Option<String>> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let raw = value.as_str().ok_or_else(|| self.invalid(key))?;
        let s = if trim { raw.trim() } else { raw };
        let len = s.chars().count();
        if len < min || len > max {
            return Err(self.invalid(key));
        }
        Ok(Some(s.to_string()))
    }

    /// Optional string of at most `max` characters; absent reads as empty.
    fn short_text(&self, key: &str, max: usize) -> Result<String> {
        Ok(self.text(key, 0, max, false)?.unwrap_or_default())
    }

    fn number(&self, key: &str, min: f64, max: f64) -> Result<Option<f64>> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let n = value.as_f64().ok_or_else(|| self.invalid(key))?;
        if n < min || n > max {
            return Err(self.invalid(key));
        }
        Ok(Some(n))
    }

    /// Enum value given by name or numeric code.
    fn choice<T>(&self, key: &str, parse: fn(&str) -> Option<T>) -> Result<Option<T>> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let parsed = match value {
            Value::String(s) => parse(s),
            Value::Number(n) => parse(&n.to_string()),
            _ => None,
        };
        parsed.map(Some).ok_or_else(|| self.invalid(key))
    }

    fn object(&self, key: &str) -> Result<Option<Scope<'a>>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(Scope {
                json: map,
                path: Some(self.child_path(key)),
            })),
            Some(_) => Err(self.invalid(key)),
        }
    }

    fn array(&self, key: &str) -> Option<&'a Vec<Value>> {
        self.get(key).and_then(Value::as_array)
    }
}

fn element<'a>(value: &'a Value, path: String) -> Result<Scope<'a>> {
    match value {
        Value::Object(map) => Ok(Scope {
            json: map,
            path: Some(path),
        }),
        _ => Err(KkmError::requires_property(&path)),
    }
}

// ---------------------------------------------------------------------------
// Printable text
// ---------------------------------------------------------------------------

/// One block of free text with its layout flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintableText {
    pub content: String,
    pub margin_outer: u32,
    pub margin_inner: u32,
    pub center: bool,
    pub magnified: bool,
    pub separated: bool,
}

impl Default for PrintableText {
    fn default() -> Self {
        Self {
            content: String::new(),
            margin_outer: 0,
            margin_inner: 1,
            center: false,
            magnified: false,
            separated: false,
        }
    }
}

impl PrintableText {
    pub fn new(content: impl Into<String>, center: bool, magnified: bool, separated: bool) -> Self {
        Self {
            content: content.into(),
            center,
            magnified,
            separated,
            ..Self::default()
        }
    }

    /// A bare separator line.
    pub fn separator() -> Self {
        Self {
            margin_inner: 0,
            separated: true,
            ..Self::default()
        }
    }

    pub fn is_set(&self) -> bool {
        !self.content.is_empty()
    }

    fn parse(scope: &Scope<'_>) -> Result<Self> {
        Ok(Self {
            content: scope.text("content", 0, usize::MAX, false)?.unwrap_or_default(),
            center: scope.flag("center")?,
            magnified: scope.flag("magnified")?,
            separated: scope.flag("separated")?,
            ..Self::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Details hierarchy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Details {
    /// Send the document electronically instead of printing it.
    pub electronically: bool,
}

impl Details {
    pub fn from_json(value: &Value) -> Result<Self> {
        Self::parse(&Scope::root(value)?)
    }

    fn parse(scope: &Scope<'_>) -> Result<Self> {
        Ok(Self {
            electronically: scope.flag("electronically")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperatorDetails {
    pub base: Details,
    pub name: String,
    pub inn: String,
}

impl OperatorDetails {
    pub fn new(name: impl Into<String>, inn: impl Into<String>) -> Self {
        Self {
            base: Details::default(),
            name: name.into(),
            inn: inn.into(),
        }
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        Self::parse(&Scope::root(value)?)
    }

    fn parse(scope: &Scope<'_>) -> Result<Self> {
        let base = Details::parse(scope)?;
        let operator = scope
            .object("operator")?
            .ok_or_else(|| KkmError::requires_property("operator"))?;
        let name = operator
            .text("name", 1, 64, true)?
            .ok_or_else(|| operator.invalid("name"))?;
        let inn = operator.short_text("inn", 12)?;
        Ok(Self { base, name, inn })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CashDetails {
    pub operator: OperatorDetails,
    pub cash_sum: f64,
}

impl CashDetails {
    pub fn from_json(value: &Value, config: &KkmConfig) -> Result<Self> {
        let scope = Scope::root(value)?;
        let operator = OperatorDetails::parse(&scope)?;
        let cash_sum = scope
            .number("cashSum", MIN_CASH_IN_OUT, config.max_cash_in_out)?
            .ok_or_else(|| KkmError::requires_property("cashSum"))?;
        Ok(Self { operator, cash_sum })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloseDetails {
    pub operator: OperatorDetails,
    pub close_shift: bool,
    pub cash_out: bool,
}

impl CloseDetails {
    pub fn new(operator: OperatorDetails, close_shift: bool, cash_out: bool) -> Self {
        Self {
            operator,
            close_shift,
            cash_out,
        }
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let scope = Scope::root(value)?;
        Ok(Self {
            operator: OperatorDetails::parse(&scope)?,
            close_shift: scope.flag("closeShift")?,
            cash_out: scope.flag("cashOut")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Receipt
// ---------------------------------------------------------------------------

/// One receipt line. Construction fails as a whole on any invalid field.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptLineItem {
    pub name: String,
    pub price: f64,
    pub quantity: f64,
    pub unit: MeasurementUnit,
    pub tax: Tax,
}

impl ReceiptLineItem {
    pub fn new(
        name: impl Into<String>,
        price: f64,
        quantity: f64,
        unit: MeasurementUnit,
        tax: Tax,
        config: &KkmConfig,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(invalid_data("commodityName"));
        }
        if !(MIN_PRICE..=config.max_price).contains(&price) {
            return Err(invalid_data("price"));
        }
        if !(MIN_QUANTITY..=config.max_quantity).contains(&quantity) {
            return Err(invalid_data("quantity"));
        }
        Ok(Self {
            name,
            price,
            quantity,
            unit,
            tax,
        })
    }
}

fn invalid_data(field: &str) -> KkmError {
    KkmError::Validation(format!("Invalid data '{field}'"))
}

/// Customer attributes; all optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomerDetails {
    pub account: String,
    pub contact: String,
    pub name: String,
    pub inn: String,
    pub birthdate: String,
    pub citizenship: String,
    pub document_code: String,
    pub document_data: String,
    pub address: String,
}

impl CustomerDetails {
    pub fn is_present(&self) -> bool {
        !self.account.is_empty() || !self.contact.is_empty() || self.has_info()
    }

    /// Whether any field packed into the structured customer attribute is set.
    pub fn has_info(&self) -> bool {
        [
            &self.name,
            &self.inn,
            &self.birthdate,
            &self.citizenship,
            &self.document_code,
            &self.document_data,
            &self.address,
        ]
        .iter()
        .any(|s| !s.is_empty())
    }

    fn parse(scope: &Scope<'_>) -> Result<Self> {
        Ok(Self {
            account: scope.short_text("account", 32)?,
            contact: scope.short_text("contact", 64)?,
            name: scope.short_text("name", 256)?,
            inn: scope.short_text("inn", 12)?,
            birthdate: scope.short_text("birthdate", 10)?,
            citizenship: scope.short_text("citizenship", 3)?,
            document_code: scope.short_text("documentCode", 32)?,
            document_data: scope.short_text("documentData", 64)?,
            address: scope.short_text("address", 256)?,
        })
    }
}

/// Supplemental metadata of an electronic payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectroPaymentInfo {
    pub method: i64,
    pub id: String,
    pub add_info: String,
}

impl ElectroPaymentInfo {
    fn parse(scope: &Scope<'_>) -> Result<Self> {
        let method = scope
            .get("method")
            .and_then(Value::as_i64)
            .ok_or_else(|| scope.invalid("method"))?;
        let id = scope
            .text("id", 1, 256, false)?
            .ok_or_else(|| scope.invalid("id"))?;
        Ok(Self {
            method,
            id,
            add_info: scope.short_text("addInfo", 256)?,
        })
    }
}

/// Payment sum meaning "let the device settle the whole receipt".
pub const PAYMENT_SUM_AUTO: f64 = -1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptDetails {
    pub operator: OperatorDetails,
    pub customer: Option<CustomerDetails>,
    pub seller_email: Option<String>,
    pub text: PrintableText,
    pub header_text: PrintableText,
    pub footer_text: PrintableText,
    pub items: Vec<ReceiptLineItem>,
    pub payment_type: PaymentType,
    /// Explicit payment sum. Non-positive values (`auto`) register no explicit
    /// payment and leave settlement to the device at close.
    pub payment_sum: f64,
    pub electro_payment_info: Option<ElectroPaymentInfo>,
}

impl ReceiptDetails {
    pub fn from_json(value: &Value, config: &KkmConfig) -> Result<Self> {
        let scope = Scope::root(value)?;
        let operator = OperatorDetails::parse(&scope)?;

        let customer = match scope.object("customer")? {
            Some(c) => Some(CustomerDetails::parse(&c)?).filter(CustomerDetails::is_present),
            None => None,
        };
        let seller_email = match scope.object("seller")? {
            Some(s) => Some(s.short_text("email", 64)?).filter(|e| !e.is_empty()),
            None => None,
        };

        let mut texts = [
            PrintableText::default(),
            PrintableText::default(),
            PrintableText::default(),
        ];
        for (slot, key) in texts.iter_mut().zip(["text", "headerText", "footerText"]) {
            if let Some(t) = scope.object(key)? {
                *slot = PrintableText::parse(&t)?;
            }
        }
        let [text, header_text, footer_text] = texts;

        let default_tax = scope.choice("tax", Tax::parse)?;
        let raw_items = scope
            .array("items")
            .ok_or_else(|| KkmError::requires_property("items"))?;
        let mut items = Vec::with_capacity(raw_items.len());
        for (i, raw) in raw_items.iter().enumerate() {
            let item = element(raw, format!("items[{i}]"))?;
            let title = item
                .text("title", 1, 128, true)?
                .ok_or_else(|| item.invalid("title"))?;
            let price = item
                .number("price", MIN_PRICE, config.max_price)?
                .ok_or_else(|| item.invalid("price"))?;
            let quantity = item
                .number("quantity", MIN_QUANTITY, config.max_quantity)?
                .ok_or_else(|| item.invalid("quantity"))?;
            let unit = item
                .choice("unit", MeasurementUnit::parse)?
                .unwrap_or_default();
            let tax = item
                .choice("tax", Tax::parse)?
                .or(default_tax)
                .ok_or_else(|| item.invalid("tax"))?;
            items.push(ReceiptLineItem::new(title, price, quantity, unit, tax, config)?);
        }

        let payment = scope
            .object("payment")?
            .ok_or_else(|| KkmError::requires_property("payment"))?;
        let payment_sum = match payment.get("sum") {
            Some(Value::Number(n)) => n.as_f64().ok_or_else(|| payment.invalid("sum"))?,
            Some(Value::String(s)) => {
                let s = s.trim().to_lowercase();
                if s == "auto" {
                    PAYMENT_SUM_AUTO
                } else {
                    s.parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .ok_or_else(|| payment.invalid("sum"))?
                }
            }
            _ => return Err(payment.invalid("sum")),
        };
        let payment_type = payment
            .choice("type", PaymentType::parse)?
            .ok_or_else(|| payment.invalid("type"))?;
        let electro_payment_info = match payment_type {
            PaymentType::Electronically => match payment.object("electroPaymentInfo")? {
                Some(info) => Some(ElectroPaymentInfo::parse(&info)?),
                None => None,
            },
            PaymentType::Cash => None,
        };

        Ok(Self {
            operator,
            customer,
            seller_email,
            text,
            header_text,
            footer_text,
            items,
            payment_type,
            payment_sum,
            electro_payment_info,
        })
    }

    /// Sum of price times quantity over all items.
    pub fn items_total(&self) -> f64 {
        self.items.iter().map(|i| i.price * i.quantity).sum()
    }
}

// ---------------------------------------------------------------------------
// Non-fiscal print
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PrintDetails {
    pub base: Details,
    pub document: Vec<PrintableText>,
    pub cliche: bool,
    pub footer: bool,
}

impl PrintDetails {
    pub fn from_json(value: &Value) -> Result<Self> {
        let scope = Scope::root(value)?;
        let base = Details::parse(&scope)?;
        let cliche = scope.flag("cliche")?;
        let footer = scope.flag("footer")?;
        let margin = scope.flag("margin")?;
        let blocks = scope
            .array("document")
            .ok_or_else(|| KkmError::requires_property("document"))?;

        let mut document = Vec::with_capacity(blocks.len());
        for (i, raw) in blocks.iter().enumerate() {
            let block = element(raw, format!("document[{i}]"))?;
            let mut text = if block.flag("separator")? {
                PrintableText::separator()
            } else {
                let content = block
                    .text("content", 0, usize::MAX, false)?
                    .ok_or_else(|| block.invalid("content"))?;
                PrintableText::new(
                    content,
                    block.flag("center")?,
                    block.flag("magnified")?,
                    block.flag("separated")?,
                )
            };
            text.margin_inner = u32::from(margin && text.is_set());
            document.push(text);
        }
        Ok(Self {
            base,
            document,
            cliche,
            footer,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn operator() -> Value {
        json!({ "name": "  Ivanova  ", "inn": "500100732259" })
    }

    fn sale(items: Value) -> Value {
        json!({
            "operator": operator(),
            "items": items,
            "payment": { "type": "cash", "sum": "auto" }
        })
    }

    #[test]
    fn test_details_accepts_null_payload() {
        assert!(!Details::from_json(&Value::Null).unwrap().electronically);
        assert!(Details::from_json(&json!([1])).is_err());
    }

    #[test]
    fn test_operator_name_is_trimmed_and_required() {
        let d = OperatorDetails::from_json(&json!({ "operator": operator() })).unwrap();
        assert_eq!(d.name, "Ivanova");

        let err = OperatorDetails::from_json(&json!({})).unwrap_err();
        assert_eq!(err.to_string(), "Required valid property 'operator'");

        let err = OperatorDetails::from_json(&json!({ "operator": { "name": "   " } })).unwrap_err();
        assert_eq!(err.to_string(), "Required valid property 'operator.name'");

        let err = OperatorDetails::from_json(&json!({ "operator": { "name": "A", "inn": "1234567890123" } }))
            .unwrap_err();
        assert_eq!(err.to_string(), "Required valid property 'operator.inn'");
    }

    #[test]
    fn test_cash_sum_bounds() {
        let config = KkmConfig::default();
        let ok = CashDetails::from_json(&json!({ "operator": operator(), "cashSum": 100.5 }), &config)
            .unwrap();
        assert_eq!(ok.cash_sum, 100.5);

        for bad in [json!(0.0), json!(1e7), json!("100")] {
            let err = CashDetails::from_json(&json!({ "operator": operator(), "cashSum": bad }), &config)
                .unwrap_err();
            assert_eq!(err.to_string(), "Required valid property 'cashSum'");
        }
    }

    #[test]
    fn test_close_details_flags() {
        let d = CloseDetails::from_json(&json!({ "operator": operator(), "closeShift": true })).unwrap();
        assert!(d.close_shift);
        assert!(!d.cash_out);
    }

    #[test]
    fn test_receipt_items_and_computed_sum() {
        let config = KkmConfig::default();
        let mut payload = sale(json!([
            { "title": "Tea", "price": 10.0, "quantity": 2, "tax": "vat20" },
            { "title": "Sugar", "price": 5.5, "quantity": 1, "unit": "kilogram", "tax": "no" }
        ]));
        payload["payment"]["sum"] = json!(100);
        let d = ReceiptDetails::from_json(&payload, &config).unwrap();
        assert_eq!(d.items.len(), 2);
        assert_eq!(d.items[1].unit, MeasurementUnit::Kilogram);
        assert_eq!(d.items_total(), 25.5);
        assert_eq!(d.payment_sum, 100.0);
        assert_eq!(d.payment_type, PaymentType::Cash);
        assert!(d.customer.is_none());
    }

    #[test]
    fn test_receipt_auto_sum() {
        let config = KkmConfig::default();
        let d = ReceiptDetails::from_json(
            &sale(json!([{ "title": "Tea", "price": 1, "quantity": 1, "tax": "no" }])),
            &config,
        )
        .unwrap();
        assert_eq!(d.payment_sum, PAYMENT_SUM_AUTO);
    }

    #[test]
    fn test_receipt_default_tax_applies() {
        let config = KkmConfig::default();
        let mut payload = sale(json!([{ "title": "Tea", "price": 1, "quantity": 1 }]));
        let err = ReceiptDetails::from_json(&payload, &config).unwrap_err();
        assert_eq!(err.to_string(), "Required valid property 'items[0].tax'");

        payload["tax"] = json!("vat10");
        let d = ReceiptDetails::from_json(&payload, &config).unwrap();
        assert_eq!(d.items[0].tax, Tax::Vat10);
    }

    #[test]
    fn test_receipt_item_errors_name_the_path() {
        let config = KkmConfig::default();
        let err = ReceiptDetails::from_json(
            &sale(json!([
                { "title": "Tea", "price": 1, "quantity": 1, "tax": "no" },
                { "title": "Tea", "price": 0.001, "quantity": 1, "tax": "no" }
            ])),
            &config,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Required valid property 'items[1].price'");

        let err = ReceiptDetails::from_json(
            &sale(json!([{ "title": "Tea", "price": 1, "quantity": 0.0001, "tax": "no" }])),
            &config,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Required valid property 'items[0].quantity'");
    }

    #[test]
    fn test_receipt_requires_items_and_payment() {
        let config = KkmConfig::default();
        let err = ReceiptDetails::from_json(&json!({ "operator": operator() }), &config).unwrap_err();
        assert_eq!(err.to_string(), "Required valid property 'items'");

        let err = ReceiptDetails::from_json(
            &json!({ "operator": operator(), "items": [] }),
            &config,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Required valid property 'payment'");

        let mut payload = sale(json!([]));
        payload["payment"]["sum"] = json!("lots");
        let err = ReceiptDetails::from_json(&payload, &config).unwrap_err();
        assert_eq!(err.to_string(), "Required valid property 'payment.sum'");
    }

    #[test]
    fn test_receipt_customer_and_seller() {
        let config = KkmConfig::default();
        let mut payload = sale(json!([{ "title": "Tea", "price": 1, "quantity": 1, "tax": "no" }]));
        payload["customer"] = json!({ "contact": "+79990000000", "account": "ACC-1" });
        payload["seller"] = json!({ "email": "" });
        let d = ReceiptDetails::from_json(&payload, &config).unwrap();
        let customer = d.customer.unwrap();
        assert!(!customer.has_info());
        assert_eq!(customer.account, "ACC-1");
        assert!(d.seller_email.is_none());

        payload["customer"] = json!({ "citizenship": "6430" });
        let err = ReceiptDetails::from_json(&payload, &config).unwrap_err();
        assert_eq!(err.to_string(), "Required valid property 'customer.citizenship'");
    }

    #[test]
    fn test_electro_payment_info_only_for_electronic_payments() {
        let config = KkmConfig::default();
        let mut payload = sale(json!([{ "title": "Tea", "price": 1, "quantity": 1, "tax": "no" }]));
        payload["payment"] = json!({
            "type": "electronically",
            "sum": 1,
            "electroPaymentInfo": { "method": 3, "id": "RRN-77" }
        });
        let d = ReceiptDetails::from_json(&payload, &config).unwrap();
        let info = d.electro_payment_info.unwrap();
        assert_eq!(info.method, 3);
        assert_eq!(info.id, "RRN-77");
        assert!(info.add_info.is_empty());

        payload["payment"]["electroPaymentInfo"] = json!({ "method": 3 });
        let err = ReceiptDetails::from_json(&payload, &config).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Required valid property 'payment.electroPaymentInfo.id'"
        );

        payload["payment"]["type"] = json!("cash");
        let d = ReceiptDetails::from_json(&payload, &config).unwrap();
        assert!(d.electro_payment_info.is_none());
    }

    #[test]
    fn test_line_item_bounds() {
        let config = KkmConfig::default();
        assert!(ReceiptLineItem::new("Tea", 1.0, 1.0, MeasurementUnit::Piece, Tax::No, &config).is_ok());
        let err = ReceiptLineItem::new("Tea", 1.0, 0.0005, MeasurementUnit::Piece, Tax::No, &config)
            .unwrap_err();
        assert!(err.is_validation());
        assert!(ReceiptLineItem::new("", 1.0, 1.0, MeasurementUnit::Piece, Tax::No, &config).is_err());
        assert!(
            ReceiptLineItem::new("Tea", config.max_price + 1.0, 1.0, MeasurementUnit::Piece, Tax::No, &config)
                .is_err()
        );
    }

    #[test]
    fn test_print_details_blocks() {
        let d = PrintDetails::from_json(&json!({
            "cliche": true,
            "margin": true,
            "document": [
                { "separator": true },
                { "content": "Hello", "center": true },
                { "content": "" }
            ]
        }))
        .unwrap();
        assert!(d.cliche);
        assert!(!d.footer);
        assert_eq!(d.document.len(), 3);
        assert!(d.document[0].separated);
        assert_eq!(d.document[0].margin_inner, 0);
        assert_eq!(d.document[1].margin_inner, 1);
        assert!(d.document[1].center);
        assert_eq!(d.document[2].margin_inner, 0);
    }

    #[test]
    fn test_print_details_requires_document_and_content() {
        let err = PrintDetails::from_json(&json!({})).unwrap_err();
        assert_eq!(err.to_string(), "Required valid property 'document'");
        let err = PrintDetails::from_json(&json!({ "document": [{ "center": true }] })).unwrap_err();
        assert_eq!(err.to_string(), "Required valid property 'document[0].content'");
    }
}

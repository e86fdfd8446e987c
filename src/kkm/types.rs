//! Device vocabulary shared by the driver seam, request parsing and reports.
//!
//! Every enum carries its driver code (`code()` / `from_code()`) and, where
//! requests can name it, a tolerant string parser that accepts the lowercase
//! name as well as the decimal driver code.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Time zone
// ---------------------------------------------------------------------------

/// Device time zone setting (`device` keeps whatever the device is set to).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeZone {
    #[serde(rename = "device")]
    Device,
    #[serde(rename = "tz1", alias = "+2", alias = "utc+2")]
    Zone1,
    #[serde(rename = "tz2", alias = "+3", alias = "utc+3")]
    Zone2,
    #[serde(rename = "tz3", alias = "+4", alias = "utc+4")]
    Zone3,
    #[serde(rename = "tz4", alias = "+5", alias = "utc+5")]
    Zone4,
    #[serde(rename = "tz5", alias = "+6", alias = "utc+6")]
    Zone5,
    #[serde(rename = "tz6", alias = "+7", alias = "utc+7")]
    Zone6,
    #[serde(rename = "tz7", alias = "+8", alias = "utc+8")]
    Zone7,
    #[serde(rename = "tz8", alias = "+9", alias = "utc+9")]
    Zone8,
    #[serde(rename = "tz9", alias = "+10", alias = "utc+10")]
    Zone9,
    #[serde(rename = "tz10", alias = "+11", alias = "utc+11")]
    Zone10,
    #[serde(rename = "tz11", alias = "+12", alias = "utc+12")]
    Zone11,
}

impl TimeZone {
    const ALL: [TimeZone; 12] = [
        TimeZone::Device,
        TimeZone::Zone1,
        TimeZone::Zone2,
        TimeZone::Zone3,
        TimeZone::Zone4,
        TimeZone::Zone5,
        TimeZone::Zone6,
        TimeZone::Zone7,
        TimeZone::Zone8,
        TimeZone::Zone9,
        TimeZone::Zone10,
        TimeZone::Zone11,
    ];

    /// Driver setting value: -1 for the device zone, 0..=10 for zones 1..=11.
    pub fn code(self) -> i32 {
        match self {
            TimeZone::Device => -1,
            other => Self::ALL.iter().position(|z| *z == other).unwrap_or(0) as i32 - 1,
        }
    }

    /// Accepts `device`, `tzN`, `+H` and `utc+H` (UTC offset of zone 1 is +2).
    pub fn parse(value: &str) -> Option<Self> {
        let v = value.trim().to_ascii_lowercase();
        if v == "device" {
            return Some(TimeZone::Device);
        }
        if let Some(n) = v.strip_prefix("tz") {
            let n: usize = n.parse().ok()?;
            return Self::ALL.get(n).copied().filter(|z| *z != TimeZone::Device);
        }
        let offset = v.strip_prefix("utc").unwrap_or(&v);
        let hours: usize = offset.strip_prefix('+')?.parse().ok()?;
        if (2..=12).contains(&hours) {
            Self::ALL.get(hours - 1).copied()
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// FFD (fiscal data format) version
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FfdVersion {
    #[default]
    Unknown,
    V105,
    V110,
    V120,
}

impl FfdVersion {
    pub fn from_code(code: i64) -> Self {
        match code {
            105 => FfdVersion::V105,
            110 => FfdVersion::V110,
            120 => FfdVersion::V120,
            _ => FfdVersion::Unknown,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            FfdVersion::Unknown => 0,
            FfdVersion::V105 => 105,
            FfdVersion::V110 => 110,
            FfdVersion::V120 => 120,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FfdVersion::Unknown => "[unknown version]",
            FfdVersion::V105 => "1.0.5",
            FfdVersion::V110 => "1.1",
            FfdVersion::V120 => "1.2",
        }
    }
}

impl Serialize for FfdVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Shift state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShiftState {
    #[default]
    Closed,
    Opened,
    Expired,
}

impl ShiftState {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => ShiftState::Opened,
            2 => ShiftState::Expired,
            _ => ShiftState::Closed,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            ShiftState::Closed => 0,
            ShiftState::Opened => 1,
            ShiftState::Expired => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ShiftState::Closed => "Shift closed",
            ShiftState::Opened => "Shift opened",
            ShiftState::Expired => "Shift expired",
        }
    }
}

// ---------------------------------------------------------------------------
// Receipt type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReceiptType {
    #[default]
    Closed,
    Sell,
    SellReturn,
    SellCorrection,
    SellReturnCorrection,
    Buy,
    BuyReturn,
    BuyCorrection,
    BuyReturnCorrection,
}

impl ReceiptType {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => ReceiptType::Sell,
            2 => ReceiptType::SellReturn,
            4 => ReceiptType::Buy,
            5 => ReceiptType::BuyReturn,
            7 => ReceiptType::SellCorrection,
            8 => ReceiptType::SellReturnCorrection,
            9 => ReceiptType::BuyCorrection,
            10 => ReceiptType::BuyReturnCorrection,
            _ => ReceiptType::Closed,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            ReceiptType::Closed => 0,
            ReceiptType::Sell => 1,
            ReceiptType::SellReturn => 2,
            ReceiptType::Buy => 4,
            ReceiptType::BuyReturn => 5,
            ReceiptType::SellCorrection => 7,
            ReceiptType::SellReturnCorrection => 8,
            ReceiptType::BuyCorrection => 9,
            ReceiptType::BuyReturnCorrection => 10,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ReceiptType::Closed => "Receipt closed",
            ReceiptType::Sell => "Sell receipt",
            ReceiptType::SellReturn => "Sell return receipt",
            ReceiptType::SellCorrection => "Sell correction receipt",
            ReceiptType::SellReturnCorrection => "Sell return correction receipt",
            ReceiptType::Buy => "Buy receipt",
            ReceiptType::BuyReturn => "Buy return receipt",
            ReceiptType::BuyCorrection => "Buy correction receipt",
            ReceiptType::BuyReturnCorrection => "Buy return correction receipt",
        }
    }
}

// ---------------------------------------------------------------------------
// Document type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DocumentType {
    #[default]
    Closed,
    ReceiptSell,
    ReceiptSellReturn,
    ReceiptBuy,
    ReceiptBuyReturn,
    OpenShift,
    CloseShift,
    Registration,
    CloseArchive,
    OfdExchangeStatus,
    ReceiptSellCorrection,
    ReceiptBuyCorrection,
    ReceiptSellReturnCorrection,
    ReceiptBuyReturnCorrection,
    DocumentService,
    DocumentCopy,
}

impl DocumentType {
    const ALL: [DocumentType; 16] = [
        DocumentType::Closed,
        DocumentType::ReceiptSell,
        DocumentType::ReceiptSellReturn,
        DocumentType::ReceiptBuy,
        DocumentType::ReceiptBuyReturn,
        DocumentType::OpenShift,
        DocumentType::CloseShift,
        DocumentType::Registration,
        DocumentType::CloseArchive,
        DocumentType::OfdExchangeStatus,
        DocumentType::ReceiptSellCorrection,
        DocumentType::ReceiptBuyCorrection,
        DocumentType::ReceiptSellReturnCorrection,
        DocumentType::ReceiptBuyReturnCorrection,
        DocumentType::DocumentService,
        DocumentType::DocumentCopy,
    ];

    pub fn from_code(code: i64) -> Self {
        usize::try_from(code)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .unwrap_or_default()
    }

    pub fn code(self) -> i64 {
        Self::ALL.iter().position(|d| *d == self).unwrap_or(0) as i64
    }

    pub fn label(self) -> &'static str {
        match self {
            DocumentType::Closed => "Document closed",
            DocumentType::ReceiptSell => "Sell receipt",
            DocumentType::ReceiptSellReturn => "Sell return receipt",
            DocumentType::ReceiptBuy => "Buy receipt",
            DocumentType::ReceiptBuyReturn => "Buy return receipt",
            DocumentType::OpenShift => "Shift opening document",
            DocumentType::CloseShift => "Shift closing document",
            DocumentType::Registration => "Registration document",
            DocumentType::CloseArchive => "Fiscal storage archive closing document",
            DocumentType::OfdExchangeStatus => "Settlement state report",
            DocumentType::ReceiptSellCorrection => "Sell correction receipt",
            DocumentType::ReceiptBuyCorrection => "Buy correction receipt",
            DocumentType::ReceiptSellReturnCorrection => "Sell return correction receipt",
            DocumentType::ReceiptBuyReturnCorrection => "Buy return correction receipt",
            DocumentType::DocumentService => "Service document",
            DocumentType::DocumentCopy => "Document copy",
        }
    }
}

// ---------------------------------------------------------------------------
// Measurement unit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeasurementUnit {
    #[default]
    Piece,
    Gram,
    Kilogram,
    Ton,
    Centimeter,
    Decimeter,
    Meter,
    SquareCentimeter,
    SquareDecimeter,
    SquareMeter,
    Milliliter,
    Liter,
    CubicMeter,
    KilowattHour,
    Gkal,
    Day,
    Hour,
    Minute,
    Second,
    Kilobyte,
    Megabyte,
    Gigabyte,
    Terabyte,
    Other,
}

impl MeasurementUnit {
    const TABLE: [(MeasurementUnit, i64, &'static str); 24] = [
        (MeasurementUnit::Piece, 0, "piece"),
        (MeasurementUnit::Gram, 10, "gram"),
        (MeasurementUnit::Kilogram, 11, "kilogram"),
        (MeasurementUnit::Ton, 12, "ton"),
        (MeasurementUnit::Centimeter, 20, "centimeter"),
        (MeasurementUnit::Decimeter, 21, "decimeter"),
        (MeasurementUnit::Meter, 22, "meter"),
        (MeasurementUnit::SquareCentimeter, 30, "square_centimeter"),
        (MeasurementUnit::SquareDecimeter, 31, "square_decimeter"),
        (MeasurementUnit::SquareMeter, 32, "square_meter"),
        (MeasurementUnit::Milliliter, 40, "milliliter"),
        (MeasurementUnit::Liter, 41, "liter"),
        (MeasurementUnit::CubicMeter, 42, "cubic_meter"),
        (MeasurementUnit::KilowattHour, 50, "kilowatt_hour"),
        (MeasurementUnit::Gkal, 51, "gkal"),
        (MeasurementUnit::Day, 70, "day"),
        (MeasurementUnit::Hour, 71, "hour"),
        (MeasurementUnit::Minute, 72, "minute"),
        (MeasurementUnit::Second, 73, "second"),
        (MeasurementUnit::Kilobyte, 80, "kilobyte"),
        (MeasurementUnit::Megabyte, 81, "megabyte"),
        (MeasurementUnit::Gigabyte, 82, "gigabyte"),
        (MeasurementUnit::Terabyte, 83, "terabyte"),
        (MeasurementUnit::Other, 255, "other"),
    ];

    pub fn code(self) -> i64 {
        Self::TABLE
            .iter()
            .find(|(u, _, _)| *u == self)
            .map(|(_, c, _)| *c)
            .unwrap_or(0)
    }

    /// Accepts `square_meter`, `squaremeter` or the numeric code.
    pub fn parse(value: &str) -> Option<Self> {
        let v = value.trim().to_ascii_lowercase();
        Self::TABLE
            .iter()
            .find(|(_, code, name)| {
                *name == v || name.replace('_', "") == v || code.to_string() == v
            })
            .map(|(u, _, _)| *u)
    }
}

// ---------------------------------------------------------------------------
// Tax
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tax {
    No,
    Vat0,
    Vat5,
    Vat105,
    Vat7,
    Vat107,
    Vat10,
    Vat110,
    Vat20,
    Vat120,
}

impl Tax {
    const TABLE: [(Tax, i64, &'static str); 10] = [
        (Tax::Vat10, 2, "vat10"),
        (Tax::Vat110, 4, "vat110"),
        (Tax::Vat0, 5, "vat0"),
        (Tax::No, 6, "no"),
        (Tax::Vat20, 7, "vat20"),
        (Tax::Vat120, 8, "vat120"),
        (Tax::Vat5, 9, "vat5"),
        (Tax::Vat7, 10, "vat7"),
        (Tax::Vat105, 11, "vat105"),
        (Tax::Vat107, 12, "vat107"),
    ];

    pub fn code(self) -> i64 {
        Self::TABLE
            .iter()
            .find(|(t, _, _)| *t == self)
            .map(|(_, c, _)| *c)
            .unwrap_or(6)
    }

    pub fn parse(value: &str) -> Option<Self> {
        let v = value.trim().to_ascii_lowercase();
        Self::TABLE
            .iter()
            .find(|(_, code, name)| *name == v || code.to_string() == v)
            .map(|(t, _, _)| *t)
    }
}

// ---------------------------------------------------------------------------
// Payment type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaymentType {
    #[default]
    Cash,
    Electronically,
}

impl PaymentType {
    /// Driver code of the informational "all electronic payments" entry.
    pub const ADD_INFO_CODE: i64 = 10;

    pub fn code(self) -> i64 {
        match self {
            PaymentType::Cash => 0,
            PaymentType::Electronically => 1,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cash" | "0" => Some(PaymentType::Cash),
            "electronically" | "1" => Some(PaymentType::Electronically),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Text position inside a fiscal document
// ---------------------------------------------------------------------------

/// Where a text block lands relative to the fiscal document body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextPosition {
    /// Printed immediately.
    #[default]
    Auto,
    /// Deferred until after the cliche.
    Pre,
    /// Deferred until after the document footer.
    Post,
}

impl TextPosition {
    pub fn code(self) -> i64 {
        match self {
            TextPosition::Auto => 0,
            TextPosition::Pre => 1,
            TextPosition::Post => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_zone_aliases() {
        assert_eq!(TimeZone::parse("device"), Some(TimeZone::Device));
        assert_eq!(TimeZone::parse("UTC+3"), Some(TimeZone::Zone2));
        assert_eq!(TimeZone::parse("+2"), Some(TimeZone::Zone1));
        assert_eq!(TimeZone::parse("tz11"), Some(TimeZone::Zone11));
        assert_eq!(TimeZone::parse("+13"), None);
        assert_eq!(TimeZone::parse("tz0"), None);
    }

    #[test]
    fn test_time_zone_codes() {
        assert_eq!(TimeZone::Device.code(), -1);
        assert_eq!(TimeZone::Zone1.code(), 0);
        assert_eq!(TimeZone::Zone11.code(), 10);
    }

    #[test]
    fn test_time_zone_deserializes_from_alias() {
        let tz: TimeZone = serde_json::from_str("\"utc+5\"").unwrap();
        assert_eq!(tz, TimeZone::Zone4);
    }

    #[test]
    fn test_measurement_unit_parse_accepts_names_and_codes() {
        assert_eq!(MeasurementUnit::parse("piece"), Some(MeasurementUnit::Piece));
        assert_eq!(
            MeasurementUnit::parse("squaremeter"),
            Some(MeasurementUnit::SquareMeter)
        );
        assert_eq!(
            MeasurementUnit::parse("square_meter"),
            Some(MeasurementUnit::SquareMeter)
        );
        assert_eq!(MeasurementUnit::parse("11"), Some(MeasurementUnit::Kilogram));
        assert_eq!(MeasurementUnit::parse("furlong"), None);
    }

    #[test]
    fn test_tax_parse() {
        assert_eq!(Tax::parse("VAT20"), Some(Tax::Vat20));
        assert_eq!(Tax::parse("no"), Some(Tax::No));
        assert_eq!(Tax::parse("6"), Some(Tax::No));
        assert_eq!(Tax::parse("vat18"), None);
    }

    #[test]
    fn test_payment_type_parse() {
        assert_eq!(PaymentType::parse("cash"), Some(PaymentType::Cash));
        assert_eq!(PaymentType::parse("1"), Some(PaymentType::Electronically));
        assert_eq!(PaymentType::parse("credit"), None);
    }

    #[test]
    fn test_receipt_type_code_roundtrip() {
        for t in [
            ReceiptType::Closed,
            ReceiptType::Sell,
            ReceiptType::SellReturn,
            ReceiptType::BuyReturnCorrection,
        ] {
            assert_eq!(ReceiptType::from_code(t.code()), t);
        }
    }

    #[test]
    fn test_ffd_version_serializes_as_label() {
        let v = serde_json::to_value(FfdVersion::V120).unwrap();
        assert_eq!(v, serde_json::json!("1.2"));
        assert_eq!(FfdVersion::from_code(999), FfdVersion::Unknown);
    }

    #[test]
    fn test_shift_state_serializes_lowercase() {
        let v = serde_json::to_value(ShiftState::Opened).unwrap();
        assert_eq!(v, serde_json::json!("opened"));
    }
}

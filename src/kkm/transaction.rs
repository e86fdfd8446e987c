//! Fiscal transactions on a [`Device`] session.
//!
//! A receipt is registered as one envelope: open, lines, payments, close. The
//! session marks itself `need_cancel` right after the device accepts the open
//! and clears it only after the close, so any early exit in between leaves the
//! cancel to teardown. Every fiscal document is then confirmed by polling the
//! device within the configured closing timeout.

use crate::kkm::config::SLEEP_QUANTUM;
use crate::kkm::details::{
    CashDetails, CloseDetails, CustomerDetails, OperatorDetails, PrintableText, ReceiptDetails,
};
use crate::kkm::device::Device;
use crate::kkm::driver::{tags, Command, DataType, Param, ReportType};
use crate::kkm::error::{KkmError, Result, CHECKING_ERROR};
use crate::kkm::result::OperationResult;
use crate::kkm::types::{PaymentType, ReceiptType, ShiftState, TextPosition};
use tracing::{debug, warn};

const SELL_LABEL: &str = "SALE";
const SELL_RETURN_LABEL: &str = "SALE RETURN";

/// Prefix of the user attribute value carrying the customer account.
const ACCOUNT_VALUE_PREFIX: &str = "  ";

impl Device {
    // -- confirmation -----------------------------------------------------

    /// Bounded retry of `command`: at most `attempts` calls with one quantum
    /// of sleep after each failed call.
    fn retry(&mut self, command: Command, attempts: u128, what: &str) -> bool {
        for _ in 0..attempts {
            if self.driver.execute(command).is_ok() {
                return true;
            }
            let description = self.take_error();
            warn!("{}{} error: {}", self.ctx(), what, description);
            self.sleeper.sleep(SLEEP_QUANTUM);
        }
        false
    }

    /// Confirm that the last fiscal document was closed and printed.
    ///
    /// A document that cannot be confirmed closed is cancelled. A closed but
    /// unprinted one is pushed with `ContinuePrint`; giving up there leaves
    /// the document as is. Both give-ups fail `result` with [`CHECKING_ERROR`].
    pub(super) fn check_document_closed(&mut self, result: &mut OperationResult) {
        let attempts =
            self.config.document_closing_timeout().as_millis() / SLEEP_QUANTUM.as_millis();

        let checked = self.retry(Command::CheckDocumentClosed, attempts, "Document closing check");
        if !checked || !self.driver.param_bool(Param::DocumentClosed) {
            if self.driver.execute(Command::CancelReceipt).is_err() {
                let description = self.take_error();
                warn!("{}Receipt cancel error: {}", self.ctx(), description);
            }
            self.fail(result, CHECKING_ERROR);
            return;
        }

        if self.driver.param_bool(Param::DocumentPrinted) {
            return;
        }
        if !self.retry(Command::ContinuePrint, attempts, "Continue print") {
            self.fail(result, CHECKING_ERROR);
        }
    }

    // -- attribute staging ------------------------------------------------

    /// Register the cashier for the next fiscal document.
    pub(super) fn set_operator(&mut self, operator: &OperatorDetails) -> Result<()> {
        debug!("{}Operator registration: {}", self.ctx(), operator.name);
        self.driver
            .set_param(Param::Tag(tags::OPERATOR_NAME), operator.name.as_str().into());
        if !operator.inn.is_empty() {
            self.driver
                .set_param(Param::Tag(tags::OPERATOR_INN), operator.inn.as_str().into());
        }
        if self.driver.execute(Command::OperatorLogin).is_err() {
            return Err(self.driver_error());
        }
        Ok(())
    }

    fn form_tlv(&mut self) -> Result<Vec<u8>> {
        if self.driver.execute(Command::UtilFormTlv).is_err() {
            return Err(self.driver_error());
        }
        Ok(self.driver.param_bytes(Param::TagValue))
    }

    /// Stage customer attributes for the receipt about to be opened.
    pub(super) fn set_customer(&mut self, customer: &CustomerDetails) -> Result<()> {
        let packed = [
            (tags::CUSTOMER_NAME, &customer.name),
            (tags::CUSTOMER_INN, &customer.inn),
            (tags::CUSTOMER_BIRTHDATE, &customer.birthdate),
            (tags::CUSTOMER_CITIZENSHIP, &customer.citizenship),
            (tags::CUSTOMER_DOCUMENT_CODE, &customer.document_code),
            (tags::CUSTOMER_DOCUMENT_DATA, &customer.document_data),
            (tags::CUSTOMER_ADDRESS, &customer.address),
        ];
        let mut any = false;
        for (tag, value) in packed {
            if !value.is_empty() {
                self.driver.set_param(Param::Tag(tag), value.as_str().into());
                any = true;
            }
        }
        if any {
            let info = self.form_tlv()?;
            self.driver
                .set_param(Param::Tag(tags::CUSTOMER_INFO), info.into());
        }

        if !customer.account.is_empty() {
            let field = self.config.customer_account_field.clone();
            self.driver
                .set_param(Param::Tag(tags::USER_ATTRIBUTE_NAME), field.into());
            self.driver.set_param(
                Param::Tag(tags::USER_ATTRIBUTE_VALUE),
                format!("{ACCOUNT_VALUE_PREFIX}{}", customer.account).into(),
            );
            let attribute = self.form_tlv()?;
            self.driver
                .set_param(Param::Tag(tags::USER_ATTRIBUTE), attribute.into());
        }

        // Name and INN are also printed as plain attributes.
        if !customer.name.is_empty() {
            self.driver
                .set_param(Param::Tag(tags::CUSTOMER_NAME), customer.name.as_str().into());
        }
        if !customer.inn.is_empty() {
            self.driver
                .set_param(Param::Tag(tags::CUSTOMER_INN), customer.inn.as_str().into());
        }
        if !customer.contact.is_empty() {
            self.driver.set_param(
                Param::Tag(tags::CUSTOMER_CONTACT),
                customer.contact.as_str().into(),
            );
        }
        Ok(())
    }

    // -- receipts ---------------------------------------------------------

    pub fn register_sell(&mut self, details: &ReceiptDetails) -> Result<OperationResult> {
        self.register_receipt(ReceiptType::Sell, details)
    }

    pub fn register_sell_return(&mut self, details: &ReceiptDetails) -> Result<OperationResult> {
        self.register_receipt(ReceiptType::SellReturn, details)
    }

    /// Errors returned before the device accepts the open leave no fiscal
    /// trace. Past that point failures land in the result and the receipt is
    /// cancelled by teardown.
    fn register_receipt(
        &mut self,
        receipt_type: ReceiptType,
        details: &ReceiptDetails,
    ) -> Result<OperationResult> {
        let label = match receipt_type {
            ReceiptType::Sell => SELL_LABEL,
            ReceiptType::SellReturn => SELL_RETURN_LABEL,
            _ => return Err(KkmError::NotImplemented),
        };
        if details.items.is_empty() {
            return Err(KkmError::RequiresItems);
        }
        debug!(
            "{}Registering {} ({} items)",
            self.ctx(),
            receipt_type.label(),
            details.items.len()
        );

        if details.header_text.is_set() {
            self.print_block(&details.header_text, TextPosition::Pre)?;
        }
        self.set_operator(&details.operator)?;
        if let Some(customer) = &details.customer {
            self.set_customer(customer)?;
        }
        if let Some(email) = &details.seller_email {
            self.driver
                .set_param(Param::Tag(tags::SELLER_EMAIL), email.as_str().into());
        }

        let mut result = OperationResult::new();
        self.driver
            .set_param(Param::ReceiptType, receipt_type.code().into());
        self.driver.set_param(
            Param::ReceiptElectronically,
            details.operator.base.electronically.into(),
        );
        if !self.run(&mut result, Command::OpenReceipt) {
            return Ok(result);
        }
        self.need_cancel = true;

        if let Err(e) = self.fill_receipt(label, details) {
            self.fail(&mut result, e.to_string());
            return Ok(result);
        }

        self.driver
            .set_param(Param::PaymentType, details.payment_type.code().into());
        if !self.run(&mut result, Command::CloseReceipt) {
            return Ok(result);
        }
        self.need_cancel = false;
        self.check_document_closed(&mut result);
        Ok(result)
    }

    /// Body of an open receipt: texts, lines and explicit payments.
    fn fill_receipt(&mut self, label: &str, details: &ReceiptDetails) -> Result<()> {
        let mut top_separator = true;
        if details.text.is_set() {
            self.print_block(&details.text, TextPosition::Auto)?;
            top_separator = !details.text.separated || details.text.magnified;
        }
        if top_separator {
            self.print_separator(0, None)?;
        }
        let title = PrintableText {
            content: label.to_string(),
            margin_inner: 0,
            ..PrintableText::default()
        };
        self.print_block(&title, TextPosition::Auto)?;
        self.print_separator(0, None)?;
        if details.footer_text.is_set() {
            self.print_block(&details.footer_text, TextPosition::Post)?;
        }

        for item in &details.items {
            self.driver
                .set_param(Param::CommodityName, item.name.as_str().into());
            self.driver.set_param(Param::Price, item.price.into());
            self.driver.set_param(Param::Quantity, item.quantity.into());
            self.driver
                .set_param(Param::MeasurementUnit, item.unit.code().into());
            self.driver.set_param(Param::TaxType, item.tax.code().into());
            if self.driver.execute(Command::Registration).is_err() {
                return Err(self.driver_error());
            }
        }

        if details.payment_sum > 0.0 {
            self.driver
                .set_param(Param::PaymentType, details.payment_type.code().into());
            self.driver
                .set_param(Param::PaymentSum, details.payment_sum.into());
            if self.driver.execute(Command::Payment).is_err() {
                return Err(self.driver_error());
            }
            if let Some(info) = &details.electro_payment_info {
                self.driver
                    .set_param(Param::PaymentType, PaymentType::ADD_INFO_CODE.into());
                self.driver
                    .set_param(Param::PaymentSum, details.payment_sum.into());
                self.driver
                    .set_param(Param::ElectronicallyPaymentMethod, info.method.into());
                self.driver
                    .set_param(Param::ElectronicallyId, info.id.as_str().into());
                if !info.add_info.is_empty() {
                    self.driver.set_param(
                        Param::ElectronicallyAddInfo,
                        info.add_info.as_str().into(),
                    );
                }
                if self.driver.execute(Command::Payment).is_err() {
                    return Err(self.driver_error());
                }
            }
        }
        Ok(())
    }

    // -- cash -------------------------------------------------------------

    fn register_cash(&mut self, details: &CashDetails, command: Command) -> Result<OperationResult> {
        self.set_operator(&details.operator)?;
        let mut result = OperationResult::new();
        self.driver.set_param(Param::Sum, details.cash_sum.into());
        self.driver.set_param(
            Param::DocumentElectronically,
            details.operator.base.electronically.into(),
        );
        self.run(&mut result, command);
        Ok(result)
    }

    pub fn register_cash_in(&mut self, details: &CashDetails) -> Result<OperationResult> {
        debug!("{}Cash in: {:.2}", self.ctx(), details.cash_sum);
        self.register_cash(details, Command::CashIncome)
    }

    pub fn register_cash_out(&mut self, details: &CashDetails) -> Result<OperationResult> {
        debug!("{}Cash out: {:.2}", self.ctx(), details.cash_sum);
        self.register_cash(details, Command::CashOutcome)
    }

    /// Withdraw the whole drawer, if there is anything in it.
    fn withdraw_drawer(&mut self, operator: &OperatorDetails, result: &mut OperationResult) -> Result<()> {
        if !self.run(result, Command::QueryData(DataType::CashSum)) {
            return Ok(());
        }
        let cash_sum = self.driver.param_f64(Param::Sum);
        if cash_sum <= 0.0 {
            debug!("{}Cash out: drawer is empty, no need", self.ctx());
            return Ok(());
        }
        self.set_operator(operator)?;
        debug!("{}Cash out: {:.2}", self.ctx(), cash_sum);
        self.driver.set_param(Param::Sum, cash_sum.into());
        self.driver.set_param(
            Param::DocumentElectronically,
            operator.base.electronically.into(),
        );
        self.run(result, Command::CashOutcome);
        Ok(())
    }

    // -- shift ------------------------------------------------------------

    fn close_open_shift(&mut self, operator: &OperatorDetails, result: &mut OperationResult) -> Result<()> {
        if !self.run(result, Command::QueryData(DataType::ShiftState)) {
            return Ok(());
        }
        if ShiftState::from_code(self.driver.param_int(Param::ShiftState)) == ShiftState::Closed {
            debug!("{}Close shift: shift is closed, no need", self.ctx());
            return Ok(());
        }
        self.set_operator(operator)?;
        debug!("{}Closing shift", self.ctx());
        if !self.run(result, Command::Report(ReportType::CloseShift)) {
            return Ok(());
        }
        self.check_document_closed(result);
        Ok(())
    }

    /// Close the shift, withdrawing the drawer first when asked.
    pub fn close_shift(&mut self, details: &CloseDetails) -> Result<OperationResult> {
        let mut result = OperationResult::new();
        if details.cash_out {
            self.withdraw_drawer(&details.operator, &mut result)?;
        }
        self.close_open_shift(&details.operator, &mut result)?;
        Ok(result)
    }

    /// X report, optionally preceded by a drawer withdrawal and a shift close.
    /// Failures of the earlier steps accumulate but do not stop the report.
    pub fn report_x(&mut self, details: &CloseDetails) -> Result<OperationResult> {
        let mut result = OperationResult::new();
        if details.cash_out {
            self.withdraw_drawer(&details.operator, &mut result)?;
        }
        if details.close_shift {
            self.close_open_shift(&details.operator, &mut result)?;
        }
        debug!("{}X report", self.ctx());
        self.run(&mut result, Command::Report(ReportType::X));
        Ok(result)
    }

    /// Cancel whatever receipt is open, then optionally withdraw the drawer
    /// and close the shift.
    pub fn reset_state(&mut self, details: &CloseDetails) -> Result<OperationResult> {
        let mut result = OperationResult::new();
        if !self.run(&mut result, Command::QueryData(DataType::ReceiptState)) {
            return Ok(result);
        }
        let receipt_type = ReceiptType::from_code(self.driver.param_int(Param::ReceiptType));
        if receipt_type != ReceiptType::Closed {
            debug!("{}Cancelling open {}", self.ctx(), receipt_type.label());
            if !self.run(&mut result, Command::CancelReceipt) {
                return Ok(result);
            }
        }
        if details.cash_out {
            self.withdraw_drawer(&details.operator, &mut result)?;
        }
        if details.close_shift {
            self.close_open_shift(&details.operator, &mut result)?;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kkm::config::KkmConfig;
    use crate::kkm::connparams::ConnParams;
    use crate::kkm::details::ReceiptLineItem;
    use crate::kkm::device::RecordingSleeper;
    use crate::kkm::driver::ParamValue;
    use crate::kkm::emulator::{CheckOutcome, EmulatedDevice};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    const SERIAL: &str = "00106700000001";

    fn session_with(device: &EmulatedDevice, config: KkmConfig) -> (Device, RecordingSleeper) {
        let sleeper = RecordingSleeper::default();
        let kkm = Device::connect(
            Box::new(device.driver()),
            &ConnParams::resolve("com,3").unwrap(),
            Arc::new(config),
            "Test: ",
        )
        .unwrap()
        .with_sleeper(Box::new(sleeper.clone()));
        (kkm, sleeper)
    }

    fn session(device: &EmulatedDevice) -> (Device, RecordingSleeper) {
        session_with(device, KkmConfig::default())
    }

    fn receipt(extra: Value, items: usize) -> ReceiptDetails {
        let mut value = json!({
            "operator": { "name": "Jane Cashier", "inn": "500100732259" },
            "tax": "vat20",
            "items": (0..items)
                .map(|i| json!({ "title": format!("Item {}", i + 1), "price": 10, "quantity": 2 }))
                .collect::<Vec<_>>(),
            "payment": { "type": "cash", "sum": "auto" }
        });
        if let (Some(target), Value::Object(extra)) = (value.as_object_mut(), extra) {
            target.extend(extra);
        }
        ReceiptDetails::from_json(&value, &KkmConfig::default()).unwrap()
    }

    fn close(cash_out: bool, close_shift: bool) -> CloseDetails {
        CloseDetails::new(OperatorDetails::new("Jane Cashier", ""), close_shift, cash_out)
    }

    fn cash(sum: f64) -> CashDetails {
        CashDetails {
            operator: OperatorDetails::new("Jane Cashier", ""),
            cash_sum: sum,
        }
    }

    #[test]
    fn test_sell_registers_and_confirms() {
        let device = EmulatedDevice::new(SERIAL);
        let (mut kkm, sleeper) = session(&device);
        let result = kkm.register_sell(&receipt(json!({}), 2)).unwrap();
        assert!(result.success, "{}", result.message);
        assert!(!kkm.need_cancel());

        let closed = device.closed_receipts();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].receipt_type, ReceiptType::Sell);
        assert_eq!(closed[0].items.len(), 2);
        assert_eq!(closed[0].total, 40.0);
        assert_eq!(
            closed[0].tags.get(&tags::OPERATOR_NAME),
            Some(&ParamValue::Str("Jane Cashier".into()))
        );
        assert_eq!(device.cash_sum(), 40.0);
        assert_eq!(device.count(Command::CheckDocumentClosed), 1);
        assert!(sleeper.sleeps().is_empty());
        drop(kkm);
        assert_eq!(device.count(Command::CancelReceipt), 0);
    }

    #[test]
    fn test_receipt_title_is_framed_by_separators() {
        let device = EmulatedDevice::new(SERIAL);
        device.set_line_length(8);
        let (mut kkm, _) = session(&device);
        kkm.register_sell_return(&receipt(json!({}), 1)).unwrap();
        let rule = "-".repeat(8);
        assert_eq!(device.printed(), vec![rule.clone(), SELL_RETURN_LABEL.to_string(), rule]);
    }

    #[test]
    fn test_separated_text_replaces_top_separator() {
        let device = EmulatedDevice::new(SERIAL);
        device.set_line_length(4);
        let (mut kkm, _) = session(&device);
        let details = receipt(
            json!({ "text": { "content": "Thanks", "separated": true } }),
            1,
        );
        kkm.register_sell(&details).unwrap();
        let printed = device.printed();
        assert_eq!(printed.len(), 3);
        assert!(printed[0].contains("Thanks"));
        assert_eq!(printed[1], SELL_LABEL);
        assert_eq!(printed[2], "----");
    }

    #[test]
    fn test_unsupported_receipt_type_is_not_implemented() {
        let device = EmulatedDevice::new(SERIAL);
        let (mut kkm, _) = session(&device);
        device.clear_journal();
        let err = kkm
            .register_receipt(ReceiptType::Buy, &receipt(json!({}), 1))
            .unwrap_err();
        assert!(matches!(err, KkmError::NotImplemented));
        assert!(device.journal().is_empty());
    }

    #[test]
    fn test_empty_items_fail_before_any_driver_call() {
        let device = EmulatedDevice::new(SERIAL);
        let (mut kkm, _) = session(&device);
        device.clear_journal();
        let err = kkm.register_sell(&receipt(json!({}), 0)).unwrap_err();
        assert!(matches!(err, KkmError::RequiresItems));
        assert!(device.journal().is_empty());
    }

    #[test]
    fn test_operator_failure_is_error_before_open() {
        let device = EmulatedDevice::new(SERIAL);
        device.fail_nth(Command::OperatorLogin, 1, "Operator blocked");
        let (mut kkm, _) = session(&device);
        let err = kkm.register_sell(&receipt(json!({}), 1)).unwrap_err();
        assert_eq!(err.to_string(), "Operator blocked");
        assert_eq!(device.count(Command::OpenReceipt), 0);
        assert!(!kkm.need_cancel());
    }

    #[test]
    fn test_open_failure_is_recorded_without_cancel() {
        let device = EmulatedDevice::new(SERIAL);
        device.force_open_receipt(ReceiptType::Sell);
        let (mut kkm, _) = session(&device);
        let result = kkm.register_sell(&receipt(json!({}), 1)).unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "Receipt already opened");
        assert!(!kkm.need_cancel());
        drop(kkm);
        assert_eq!(device.count(Command::CancelReceipt), 0);
    }

    #[test]
    fn test_item_failure_leaves_cancel_to_teardown() {
        let device = EmulatedDevice::new(SERIAL);
        device.fail_nth(Command::Registration, 2, "Invalid tax");
        let (mut kkm, _) = session(&device);
        let result = kkm.register_sell(&receipt(json!({}), 3)).unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "Invalid tax");
        assert!(kkm.need_cancel());
        assert_eq!(device.count(Command::Registration), 2);
        assert_eq!(device.open_receipt_items().len(), 1);
        assert_eq!(device.count(Command::CloseReceipt), 0);
        assert_eq!(device.count(Command::CancelReceipt), 0);

        drop(kkm);
        assert_eq!(device.count(Command::CancelReceipt), 1);
        assert!(!device.receipt_open());
        assert!(device.closed_receipts().is_empty());
    }

    #[test]
    fn test_payment_failure_leaves_cancel_to_teardown() {
        let device = EmulatedDevice::new(SERIAL);
        device.fail_nth(Command::Payment, 1, "Payment declined");
        let (mut kkm, _) = session(&device);
        let result = kkm.register_sell(&receipt(json!({}), 2)).unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "Payment declined");
        assert!(kkm.need_cancel());
        assert_eq!(device.count(Command::Registration), 2);
        assert_eq!(device.count(Command::Payment), 1);
        assert_eq!(device.count(Command::CloseReceipt), 0);
        assert_eq!(device.count(Command::CheckDocumentClosed), 0);
        assert_eq!(device.count(Command::CancelReceipt), 0);

        drop(kkm);
        assert_eq!(device.count(Command::CancelReceipt), 1);
        assert!(!device.receipt_open());
        assert!(device.closed_receipts().is_empty());
    }

    #[test]
    fn test_payment_details_failure_leaves_cancel_to_teardown() {
        let device = EmulatedDevice::new(SERIAL);
        device.fail_nth(Command::Payment, 2, "Unknown payment method");
        let (mut kkm, _) = session(&device);
        let details = receipt(
            json!({
                "payment": {
                    "type": "electronically",
                    "sum": 20,
                    "electroPaymentInfo": { "method": 1, "id": "TX-1" }
                }
            }),
            1,
        );
        let result = kkm.register_sell(&details).unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "Unknown payment method");
        assert!(kkm.need_cancel());
        assert_eq!(device.count(Command::Payment), 2);
        assert_eq!(device.count(Command::CloseReceipt), 0);
        assert_eq!(device.count(Command::CheckDocumentClosed), 0);

        drop(kkm);
        assert_eq!(device.count(Command::CancelReceipt), 1);
        assert!(!device.receipt_open());
        assert!(device.closed_receipts().is_empty());
    }

    #[test]
    fn test_close_receipt_failure_leaves_cancel_to_teardown() {
        let device = EmulatedDevice::new(SERIAL);
        device.fail_nth(Command::CloseReceipt, 1, "Fiscal storage full");
        let (mut kkm, sleeper) = session(&device);
        let result = kkm.register_sell(&receipt(json!({}), 1)).unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "Fiscal storage full");
        assert!(kkm.need_cancel());
        assert_eq!(device.count(Command::CloseReceipt), 1);
        assert_eq!(device.count(Command::CheckDocumentClosed), 0);
        assert_eq!(device.count(Command::CancelReceipt), 0);
        assert!(sleeper.sleeps().is_empty());

        drop(kkm);
        assert_eq!(device.count(Command::CancelReceipt), 1);
        assert!(!device.receipt_open());
        assert!(device.closed_receipts().is_empty());
    }

    #[test]
    fn test_print_failure_inside_receipt_is_recorded() {
        let device = EmulatedDevice::new(SERIAL);
        device.fail_nth(Command::PrintText, 2, "Paper jam");
        let (mut kkm, _) = session(&device);
        let result = kkm.register_sell(&receipt(json!({}), 1)).unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "Paper jam");
        assert!(kkm.need_cancel());
        assert_eq!(device.count(Command::Registration), 0);
    }

    #[test]
    fn test_header_failure_is_error_before_open() {
        let device = EmulatedDevice::new(SERIAL);
        device.fail_nth(Command::PrintText, 1, "Paper jam");
        let (mut kkm, _) = session(&device);
        let details = receipt(json!({ "headerText": { "content": "Welcome" } }), 1);
        assert!(kkm.register_sell(&details).is_err());
        assert_eq!(device.count(Command::OpenReceipt), 0);
    }

    #[test]
    fn test_confirmation_retries_until_poll_succeeds() {
        let device = EmulatedDevice::new(SERIAL);
        device.script_check_closed([CheckOutcome::Error, CheckOutcome::Error, CheckOutcome::Error]);
        let (mut kkm, sleeper) = session(&device);
        let result = kkm.register_sell(&receipt(json!({}), 1)).unwrap();
        assert!(result.success, "{}", result.message);
        assert_eq!(device.count(Command::CheckDocumentClosed), 4);
        assert_eq!(sleeper.sleeps(), vec![SLEEP_QUANTUM; 3]);
    }

    #[test]
    fn test_confirmation_gives_up_and_cancels() {
        let device = EmulatedDevice::new(SERIAL);
        device.set_check_fallback(CheckOutcome::Error);
        let (mut kkm, sleeper) = session(&device);
        let result = kkm.register_sell(&receipt(json!({}), 1)).unwrap();
        assert!(!result.success);
        assert_eq!(result.message, CHECKING_ERROR);
        assert_eq!(device.count(Command::CheckDocumentClosed), 5);
        assert_eq!(device.count(Command::CancelReceipt), 1);
        assert_eq!(sleeper.sleeps().iter().sum::<Duration>(), Duration::from_millis(1000));
    }

    #[test]
    fn test_confirmation_budget_below_quantum_fails_immediately() {
        let device = EmulatedDevice::new(SERIAL);
        let config = KkmConfig {
            document_closing_timeout: 100,
            ..KkmConfig::default()
        };
        let (mut kkm, sleeper) = session_with(&device, config);
        let result = kkm.register_sell(&receipt(json!({}), 1)).unwrap();
        assert!(!result.success);
        assert_eq!(result.message, CHECKING_ERROR);
        assert_eq!(device.count(Command::CheckDocumentClosed), 0);
        assert_eq!(device.count(Command::CancelReceipt), 1);
        assert!(sleeper.sleeps().is_empty());
    }

    #[test]
    fn test_unclosed_document_is_cancelled() {
        let device = EmulatedDevice::new(SERIAL);
        device.script_check_closed([CheckOutcome::Done {
            closed: false,
            printed: false,
        }]);
        let (mut kkm, _) = session(&device);
        let result = kkm.register_sell(&receipt(json!({}), 1)).unwrap();
        assert_eq!(result.message, CHECKING_ERROR);
        assert_eq!(device.count(Command::CheckDocumentClosed), 1);
        assert_eq!(device.count(Command::CancelReceipt), 1);
    }

    #[test]
    fn test_unprinted_document_is_continued() {
        let device = EmulatedDevice::new(SERIAL);
        device.script_check_closed([CheckOutcome::Done {
            closed: true,
            printed: false,
        }]);
        device.script_continue_print([false, true]);
        let (mut kkm, sleeper) = session(&device);
        let result = kkm.register_sell(&receipt(json!({}), 1)).unwrap();
        assert!(result.success, "{}", result.message);
        assert_eq!(device.count(Command::ContinuePrint), 2);
        assert_eq!(sleeper.sleeps().len(), 1);
        assert_eq!(device.count(Command::CancelReceipt), 0);
    }

    #[test]
    fn test_continue_print_exhaustion_does_not_cancel() {
        let device = EmulatedDevice::new(SERIAL);
        device.script_check_closed([CheckOutcome::Done {
            closed: true,
            printed: false,
        }]);
        device.set_continue_fallback(false);
        let (mut kkm, _) = session(&device);
        let result = kkm.register_sell(&receipt(json!({}), 1)).unwrap();
        assert_eq!(result.message, CHECKING_ERROR);
        assert_eq!(device.count(Command::ContinuePrint), 5);
        assert_eq!(device.count(Command::CancelReceipt), 0);
        assert_eq!(device.closed_receipts().len(), 1);
    }

    #[test]
    fn test_customer_attributes_are_packed() {
        let device = EmulatedDevice::new(SERIAL);
        let (mut kkm, _) = session(&device);
        let details = receipt(
            json!({
                "customer": { "name": "Ann Buyer", "account": "42", "contact": "ann@example.com" },
                "seller": { "email": "shop@example.com" }
            }),
            1,
        );
        assert!(kkm.register_sell(&details).unwrap().success);

        let closed = device.closed_receipts();
        let tags_of = &closed[0].tags;
        match tags_of.get(&tags::CUSTOMER_INFO) {
            Some(ParamValue::Bytes(bytes)) => {
                assert_eq!(&bytes[..2], &tags::CUSTOMER_NAME.to_le_bytes());
                assert!(bytes.ends_with(b"Ann Buyer"));
            }
            other => panic!("unexpected customer info {other:?}"),
        }
        match tags_of.get(&tags::USER_ATTRIBUTE) {
            Some(ParamValue::Bytes(bytes)) => assert!(bytes.ends_with(b"  42")),
            other => panic!("unexpected user attribute {other:?}"),
        }
        assert_eq!(
            tags_of.get(&tags::CUSTOMER_CONTACT),
            Some(&ParamValue::Str("ann@example.com".into()))
        );
        assert_eq!(
            tags_of.get(&tags::SELLER_EMAIL),
            Some(&ParamValue::Str("shop@example.com".into()))
        );
        assert_eq!(device.count(Command::UtilFormTlv), 2);
    }

    #[test]
    fn test_electronic_payment_with_add_info() {
        let device = EmulatedDevice::new(SERIAL);
        let (mut kkm, _) = session(&device);
        let details = receipt(
            json!({
                "payment": {
                    "type": "electronically",
                    "sum": 20,
                    "electroPaymentInfo": { "method": 1, "id": "TX-1", "addInfo": "card" }
                }
            }),
            1,
        );
        assert!(kkm.register_sell(&details).unwrap().success);

        let payments = &device.closed_receipts()[0].payments;
        assert_eq!(payments.len(), 2);
        assert_eq!(payments[0].payment_type, PaymentType::Electronically.code());
        assert_eq!(payments[0].sum, 20.0);
        assert_eq!(payments[1].payment_type, PaymentType::ADD_INFO_CODE);
        assert_eq!(payments[1].method, Some(1));
        assert_eq!(payments[1].id.as_deref(), Some("TX-1"));
        assert_eq!(payments[1].add_info.as_deref(), Some("card"));
        assert_eq!(device.cash_sum(), 0.0);
    }

    #[test]
    fn test_line_item_below_minimum_quantity_is_rejected() {
        let err = ReceiptLineItem::new(
            "Bolt",
            1.0,
            0.0001,
            Default::default(),
            crate::kkm::types::Tax::No,
            &KkmConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid data 'quantity'");
    }

    #[test]
    fn test_close_shift_twice_reports_once() {
        let device = EmulatedDevice::new(SERIAL);
        device.set_shift_state(ShiftState::Opened);
        let (mut kkm, _) = session(&device);
        assert!(kkm.close_shift(&close(false, false)).unwrap().success);
        assert_eq!(device.shift_state(), ShiftState::Closed);
        assert_eq!(device.report_calls(), 1);

        let second = kkm.close_shift(&close(false, false)).unwrap();
        assert!(second.success);
        assert_eq!(device.report_calls(), 1);
    }

    #[test]
    fn test_close_shift_withdraws_drawer_first() {
        let device = EmulatedDevice::new(SERIAL);
        device.set_shift_state(ShiftState::Opened);
        device.set_cash_sum(100.0);
        let (mut kkm, _) = session(&device);
        assert!(kkm.close_shift(&close(true, false)).unwrap().success);
        assert_eq!(device.cash_sum(), 0.0);
        assert_eq!(device.count(Command::CashOutcome), 1);
        assert_eq!(device.reports(), vec![ReportType::CloseShift]);
    }

    #[test]
    fn test_empty_drawer_needs_no_withdrawal() {
        let device = EmulatedDevice::new(SERIAL);
        let (mut kkm, _) = session(&device);
        assert!(kkm.close_shift(&close(true, false)).unwrap().success);
        assert_eq!(device.count(Command::CashOutcome), 0);
        assert_eq!(device.count(Command::OperatorLogin), 0);
    }

    #[test]
    fn test_report_x_accumulates_failures() {
        let device = EmulatedDevice::new(SERIAL);
        device.fail_nth(Command::QueryData(DataType::CashSum), 1, "Drawer offline");
        let (mut kkm, _) = session(&device);
        let result = kkm.report_x(&close(true, false)).unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "Drawer offline");
        assert_eq!(device.reports(), vec![ReportType::X]);
    }

    #[test]
    fn test_report_x_after_close_shift() {
        let device = EmulatedDevice::new(SERIAL);
        device.set_shift_state(ShiftState::Opened);
        let (mut kkm, _) = session(&device);
        assert!(kkm.report_x(&close(false, true)).unwrap().success);
        assert_eq!(device.reports(), vec![ReportType::CloseShift, ReportType::X]);
    }

    #[test]
    fn test_reset_state_cancels_open_receipt() {
        let device = EmulatedDevice::new(SERIAL);
        device.force_open_receipt(ReceiptType::SellReturn);
        let (mut kkm, _) = session(&device);
        assert!(kkm.reset_state(&close(false, false)).unwrap().success);
        assert!(!device.receipt_open());
        assert_eq!(device.count(Command::CancelReceipt), 1);
    }

    #[test]
    fn test_reset_state_on_clean_device_is_noop() {
        let device = EmulatedDevice::new(SERIAL);
        let (mut kkm, _) = session(&device);
        assert!(kkm.reset_state(&close(false, false)).unwrap().success);
        assert_eq!(device.count(Command::CancelReceipt), 0);
    }

    #[test]
    fn test_cash_in_and_out_move_drawer() {
        let device = EmulatedDevice::new(SERIAL);
        let (mut kkm, _) = session(&device);
        assert!(kkm.register_cash_in(&cash(50.0)).unwrap().success);
        assert!(kkm.register_cash_out(&cash(20.0)).unwrap().success);
        assert_eq!(device.cash_sum(), 30.0);
        assert_eq!(device.operator().as_deref(), Some("Jane Cashier"));

        let overdraw = kkm.register_cash_out(&cash(100.0)).unwrap();
        assert!(!overdraw.success);
        assert_eq!(overdraw.message, "Not enough cash in drawer");
    }
}

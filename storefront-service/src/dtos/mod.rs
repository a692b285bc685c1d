pub mod admin;
pub mod orders;
pub mod payments;
pub mod returns;

use rust_decimal::Decimal;
use validator::ValidationError;

pub(crate) fn non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ValidationError::new("non_negative"));
    }
    Ok(())
}

pub(crate) fn positive(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        return Err(ValidationError::new("positive"));
    }
    Ok(())
}

use crate::error::{PurchaseError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The four utility flows. They share one orchestrator and differ only in
/// the target payload shape checked by their validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Airtime,
    Electricity,
    Internet,
    Tv,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceKind::Airtime => "airtime",
            ServiceKind::Electricity => "electricity",
            ServiceKind::Internet => "internet",
            ServiceKind::Tv => "tv",
        };
        f.write_str(name)
    }
}

/// What is being purchased. The orchestrator passes this through to the
/// billing provider unexamined; only the injected validator looks inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTarget {
    pub service: ServiceKind,
    pub biller_code: String,
    #[serde(default)]
    pub variation_code: Option<String>,
    /// Recipient identifier: phone number, meter number or smartcard number
    /// depending on the service.
    pub recipient: String,
    /// Provider-specific qualifier, e.g. prepaid/postpaid for electricity.
    #[serde(default)]
    pub subtype: Option<String>,
}

/// Shape check for a service target, run during validation before any
/// transaction is signed.
pub trait TargetValidator: Send + Sync {
    fn validate(&self, target: &ServiceTarget) -> Result<()>;
}

pub type ValidatorRef = Arc<dyn TargetValidator>;

/// Dispatches to the per-service rules. This is the validator deployments
/// use unless a biller needs something stricter.
pub struct StandardValidator;

impl TargetValidator for StandardValidator {
    fn validate(&self, target: &ServiceTarget) -> Result<()> {
        if target.biller_code.trim().is_empty() {
            return Err(PurchaseError::Validation("missing biller code".into()));
        }
        match target.service {
            ServiceKind::Airtime => require_phone(&target.recipient),
            ServiceKind::Internet => {
                require_phone(&target.recipient)?;
                require_variation(target)
            }
            ServiceKind::Electricity => {
                require_digits(&target.recipient, 6, 13, "meter number")?;
                match target.subtype.as_deref() {
                    Some("prepaid") | Some("postpaid") => Ok(()),
                    _ => Err(PurchaseError::Validation(
                        "electricity orders need a prepaid or postpaid subtype".into(),
                    )),
                }
            }
            ServiceKind::Tv => {
                require_digits(&target.recipient, 8, 12, "smartcard number")?;
                require_variation(target)
            }
        }
    }
}

fn require_variation(target: &ServiceTarget) -> Result<()> {
    match target.variation_code.as_deref() {
        Some(code) if !code.trim().is_empty() => Ok(()),
        _ => Err(PurchaseError::Validation(format!(
            "{} orders need a plan variation code",
            target.service
        ))),
    }
}

fn require_phone(recipient: &str) -> Result<()> {
    let digits = recipient.strip_prefix('+').unwrap_or(recipient);
    if digits.len() >= 10 && digits.len() <= 15 && digits.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(PurchaseError::Validation(format!(
            "{recipient} is not a valid phone number"
        )))
    }
}

fn require_digits(recipient: &str, min: usize, max: usize, what: &str) -> Result<()> {
    if recipient.len() >= min
        && recipient.len() <= max
        && recipient.chars().all(|c| c.is_ascii_digit())
    {
        Ok(())
    } else {
        Err(PurchaseError::Validation(format!(
            "{recipient} is not a valid {what}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(service: ServiceKind, recipient: &str) -> ServiceTarget {
        ServiceTarget {
            service,
            biller_code: "biller-1".into(),
            variation_code: Some("plan-a".into()),
            recipient: recipient.into(),
            subtype: None,
        }
    }

    #[test]
    fn test_airtime_accepts_phone_numbers() {
        let validator = StandardValidator;
        assert!(validator.validate(&target(ServiceKind::Airtime, "+2348012345678")).is_ok());
        assert!(validator.validate(&target(ServiceKind::Airtime, "08012345678")).is_ok());
        assert!(validator.validate(&target(ServiceKind::Airtime, "not-a-phone")).is_err());
        assert!(validator.validate(&target(ServiceKind::Airtime, "123")).is_err());
    }

    #[test]
    fn test_electricity_requires_meter_and_subtype() {
        let validator = StandardValidator;
        let mut t = target(ServiceKind::Electricity, "45023187body");
        assert!(validator.validate(&t).is_err());

        t.recipient = "45023187001".into();
        assert!(validator.validate(&t).is_err(), "missing subtype must fail");

        t.subtype = Some("prepaid".into());
        assert!(validator.validate(&t).is_ok());

        t.subtype = Some("weekly".into());
        assert!(validator.validate(&t).is_err());
    }

    #[test]
    fn test_tv_and_internet_require_variation() {
        let validator = StandardValidator;
        let mut tv = target(ServiceKind::Tv, "7025486921");
        assert!(validator.validate(&tv).is_ok());
        tv.variation_code = None;
        assert!(validator.validate(&tv).is_err());

        let mut net = target(ServiceKind::Internet, "08012345678");
        assert!(validator.validate(&net).is_ok());
        net.variation_code = Some("  ".into());
        assert!(validator.validate(&net).is_err());
    }

    #[test]
    fn test_missing_biller_code() {
        let validator = StandardValidator;
        let mut t = target(ServiceKind::Airtime, "08012345678");
        t.biller_code = "".into();
        assert!(validator.validate(&t).is_err());
    }

    #[test]
    fn test_target_deserialization() {
        let json = r#"{"service":"electricity","biller_code":"ikeja","recipient":"45023187001","subtype":"prepaid"}"#;
        let t: ServiceTarget = serde_json::from_str(json).unwrap();
        assert_eq!(t.service, ServiceKind::Electricity);
        assert_eq!(t.variation_code, None);
        assert_eq!(t.subtype.as_deref(), Some("prepaid"));
    }
}

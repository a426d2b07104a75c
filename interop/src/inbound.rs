//! Reporting results of calls the script engine made into the host.
//!
//! Errors raised by host code can carry internals (paths, SQL, stack
//! frames). Before a failure crosses back, it passes through an
//! [`ErrorSanitizer`]; the default replaces it with a fixed message that
//! names only the target.

use ferry_types::{InvocationInfo, InvocationTarget};

use crate::transport::InboundCompletion;

/// Outcome of executing an inbound call on the host.
pub type InvocationResult = Result<serde_json::Value, anyhow::Error>;

/// Turns a host-side failure into the text sent to the script engine.
pub trait ErrorSanitizer: Send + Sync {
    fn sanitize(&self, target: &InvocationTarget, error: &anyhow::Error) -> String;
}

/// Discards the error and reports a generic message naming the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericErrors;

impl ErrorSanitizer for GenericErrors {
    fn sanitize(&self, target: &InvocationTarget, _error: &anyhow::Error) -> String {
        generic_error_message(target)
    }
}

/// Reports the full error chain. For development setups only.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetailedErrors;

impl ErrorSanitizer for DetailedErrors {
    fn sanitize(&self, target: &InvocationTarget, error: &anyhow::Error) -> String {
        format!("An error occurred while invoking '{target}': {error:#}")
    }
}

#[must_use]
pub fn generic_error_message(target: &InvocationTarget) -> String {
    format!(
        "An error ocurred while invoking '{target}'. Swapping to 'Development' environment will display more detailed information about the error that occurred."
    )
}

/// Build the message for the script engine, or `None` for fire-and-forget calls.
pub(crate) fn completion_for(
    info: &InvocationInfo,
    result: InvocationResult,
    sanitizer: &dyn ErrorSanitizer,
) -> Option<InboundCompletion> {
    let Some(call_id) = info.call_id() else {
        if let Err(error) = &result {
            tracing::debug!(
                target_method = %info.target(),
                "Fire-and-forget inbound call failed: {error:#}"
            );
        }
        return None;
    };

    let completion = match result {
        Ok(value) => InboundCompletion {
            call_id: call_id.to_string(),
            success: true,
            result: value,
        },
        Err(error) => {
            tracing::debug!(
                call_id,
                target_method = %info.target(),
                "Inbound call failed: {error:#}"
            );
            InboundCompletion {
                call_id: call_id.to_string(),
                success: false,
                result: serde_json::Value::String(sanitizer.sanitize(info.target(), &error)),
            }
        }
    };
    Some(completion)
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use ferry_types::ObjectId;

    use super::*;

    fn info(call_id: Option<&str>) -> InvocationInfo {
        InvocationInfo::new(
            call_id.map(String::from),
            InvocationTarget::static_method("Billing", "ComputeTotal"),
        )
    }

    #[test]
    fn generic_message_matches_template() {
        let target = InvocationTarget::static_method("Billing", "ComputeTotal");
        let message = GenericErrors.sanitize(&target, &anyhow!("password=hunter2"));
        assert_eq!(
            message,
            "An error ocurred while invoking '[Billing]::ComputeTotal'. Swapping to 'Development' \
             environment will display more detailed information about the error that occurred."
        );
        assert!(!message.contains("hunter2"));
    }

    #[test]
    fn generic_message_for_instance_target() {
        let target = InvocationTarget::instance_method(ObjectId::new(3), "Refresh");
        assert!(generic_error_message(&target).contains("'[]::Refresh'"));
    }

    #[test]
    fn detailed_errors_include_the_chain() {
        let target = InvocationTarget::static_method("Billing", "ComputeTotal");
        let error = anyhow!("disk full").context("writing invoice");
        let message = DetailedErrors.sanitize(&target, &error);
        assert!(message.contains("writing invoice"));
        assert!(message.contains("disk full"));
    }

    #[test]
    fn success_passes_value_through() {
        let completion =
            completion_for(&info(Some("7")), Ok(serde_json::json!(42)), &GenericErrors).unwrap();
        assert_eq!(
            completion,
            InboundCompletion {
                call_id: "7".to_string(),
                success: true,
                result: serde_json::json!(42),
            }
        );
    }

    #[test]
    fn failure_is_sanitized() {
        let completion =
            completion_for(&info(Some("8")), Err(anyhow!("secret detail")), &GenericErrors)
                .unwrap();
        assert!(!completion.success);
        let text = completion.result.as_str().unwrap();
        assert!(text.starts_with("An error ocurred while invoking '[Billing]::ComputeTotal'."));
        assert!(!text.contains("secret detail"));
    }

    #[test]
    fn fire_and_forget_produces_nothing() {
        assert!(completion_for(&info(None), Ok(serde_json::Value::Null), &GenericErrors).is_none());
        assert!(completion_for(&info(None), Err(anyhow!("x")), &GenericErrors).is_none());
    }
}

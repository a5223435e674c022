//! Tests for error handling and the status taxonomy

use crate::{Code, Error};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_argument("topic address must not be empty");
        assert_eq!(
            err.to_string(),
            "Invalid argument: topic address must not be empty"
        );

        let err = Error::deadline_exceeded("invoke device/engine/rpc/start", 5000);
        assert_eq!(
            err.to_string(),
            "Operation timed out after 5000ms: invoke device/engine/rpc/start"
        );

        let err = Error::cancelled("client disconnected while call was outstanding");
        assert_eq!(
            err.to_string(),
            "Cancelled: client disconnected while call was outstanding"
        );
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            Error::invalid_argument("bad").code(),
            Code::InvalidArgument
        );
        assert_eq!(Error::already_exists("taken").code(), Code::AlreadyExists);
        assert_eq!(Error::aborted("dup").code(), Code::Aborted);
        assert_eq!(Error::unavailable_msg("down").code(), Code::Unavailable);
        assert_eq!(Error::cancelled("gone").code(), Code::Cancelled);
        assert_eq!(
            Error::deadline_exceeded("op", 10).code(),
            Code::DeadlineExceeded
        );
        assert_eq!(Error::unknown("?").code(), Code::Unknown);
    }

    #[test]
    fn test_from_code_round_trips() {
        for code in [
            Code::InvalidArgument,
            Code::AlreadyExists,
            Code::Aborted,
            Code::Unavailable,
            Code::Cancelled,
            Code::PermissionDenied,
            Code::NotFound,
            Code::Unauthenticated,
            Code::Unknown,
        ] {
            assert_eq!(Error::from_code(code, "remote failure").code(), code);
        }

        // DeadlineExceeded keeps the message as the operation name
        assert_eq!(
            Error::from_code(Code::DeadlineExceeded, "remote failure").code(),
            Code::DeadlineExceeded
        );

        // Ok never names a failure; it degrades to Unknown defensively
        assert_eq!(Error::from_code(Code::Ok, "?").code(), Code::Unknown);
    }

    #[test]
    fn test_error_is_retryable() {
        // Retryable errors
        assert!(Error::unavailable_msg("transport down").is_retryable());
        assert!(Error::deadline_exceeded("invoke", 1000).is_retryable());
        assert!(Error::aborted("raced").is_retryable());

        // Non-retryable errors
        assert!(!Error::invalid_argument("bad address").is_retryable());
        assert!(!Error::already_exists("method taken").is_retryable());
        assert!(!Error::cancelled("torn down").is_retryable());
        assert!(!Error::unknown("?").is_retryable());
    }

    #[test]
    fn test_error_with_source() {
        use std::io;

        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "socket reset");
        let err = Error::unavailable("send failed", io_err);

        assert_eq!(err.code(), Code::Unavailable);
        let source = std::error::Error::source(&err).expect("source must be chained");
        assert!(source.to_string().contains("socket reset"));
    }

    #[test]
    fn test_code_display() {
        assert_eq!(Code::Ok.to_string(), "OK");
        assert_eq!(Code::InvalidArgument.to_string(), "INVALID_ARGUMENT");
        assert_eq!(Code::DeadlineExceeded.to_string(), "DEADLINE_EXCEEDED");
        assert_eq!(Code::Unauthenticated.to_string(), "UNAUTHENTICATED");
    }
}

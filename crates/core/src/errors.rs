use thiserror::Error;

use crate::bus::BusError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("alert payload is empty")]
    EmptyPayload,
    #[error("alert payload is malformed: {0}")]
    MalformedPayload(String),
    #[error("thread handle already assigned for event {event_id}")]
    ThreadAlreadyAssigned { event_id: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("unprocessable payload: {message}")]
    Unprocessable { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unprocessable { .. } => {
                "The alert payload could not be parsed. Check the body and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The relay is temporarily unable to queue alerts. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unprocessable { .. } => 422,
            Self::ServiceUnavailable { .. } => 503,
            Self::Internal { .. } => 500,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Unprocessable { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Unprocessable { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::Unprocessable { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(error @ DomainError::EmptyPayload)
            | ApplicationError::Domain(error @ DomainError::MalformedPayload(_)) => {
                Self::Unprocessable { message: error.to_string(), correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Domain(error @ DomainError::ThreadAlreadyAssigned { .. }) => {
                Self::Internal { message: error.to_string(), correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Bus(error) => Self::ServiceUnavailable {
                message: error.to_string(),
                correlation_id: "unassigned".to_owned(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::bus::BusError;
    use crate::errors::{ApplicationError, DomainError, InterfaceError};

    #[test]
    fn malformed_payload_maps_to_unprocessable_interface_error() {
        let interface =
            ApplicationError::from(DomainError::MalformedPayload("expected value".to_owned()))
                .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::Unprocessable {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(interface.status_code(), 422);
    }

    #[test]
    fn empty_payload_has_user_safe_message() {
        let interface = ApplicationError::from(DomainError::EmptyPayload).into_interface("req-2");

        assert_eq!(
            interface.user_message(),
            "The alert payload could not be parsed. Check the body and try again."
        );
        assert_eq!(interface.message(), "alert payload is empty");
    }

    #[test]
    fn bus_error_maps_to_service_unavailable() {
        let interface = ApplicationError::from(BusError::Closed).into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(interface.status_code(), 503);
        assert_eq!(interface.correlation_id(), "req-3");
    }

    #[test]
    fn thread_conflict_maps_to_internal() {
        let interface = ApplicationError::from(DomainError::ThreadAlreadyAssigned {
            event_id: "evt-1".to_owned(),
        })
        .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
        assert_eq!(interface.status_code(), 500);
    }
}

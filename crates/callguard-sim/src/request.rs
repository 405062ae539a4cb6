//! Wire shapes of the resiliency service.

use serde::{Deserialize, Serialize};

use callguard_core::{Code, Payload, TransportError};

/// Status code the service treats as success.
pub const OK: u32 = 0;
/// Status code for a generic failure.
pub const UNKNOWN: u32 = 2;

/// Asks the service to wait a random number of delay units in
/// `[min_delay_second, max_delay_second]` and then answer with a status code
/// drawn from `status_codes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResiliencyRequest {
    #[serde(default)]
    pub min_delay_second: i32,
    #[serde(default)]
    pub max_delay_second: i32,
    #[serde(default)]
    pub status_codes: Vec<u32>,
}

impl ResiliencyRequest {
    pub fn new(min_delay_second: i32, max_delay_second: i32, status_codes: Vec<u32>) -> Self {
        Self {
            min_delay_second,
            max_delay_second,
            status_codes,
        }
    }

    /// Answer immediately with the given codes.
    pub fn immediate(status_codes: Vec<u32>) -> Self {
        Self::new(0, 0, status_codes)
    }

    pub fn to_payload(&self) -> Payload {
        // A struct of integers always serializes.
        serde_json::to_value(self).unwrap_or_default()
    }

    pub fn from_payload(payload: &Payload) -> Result<Self, TransportError> {
        let request: Self = serde_json::from_value(payload.clone())
            .map_err(|e| TransportError::new(Code::InvalidArgument, e.to_string()))?;
        request.validate()?;
        Ok(request)
    }

    fn validate(&self) -> Result<(), TransportError> {
        if self.min_delay_second < 0 || self.max_delay_second < self.min_delay_second {
            return Err(TransportError::new(
                Code::InvalidArgument,
                format!(
                    "invalid delay range [{}, {}]",
                    self.min_delay_second, self.max_delay_second
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResiliencyResponse {
    pub dummy_string: String,
}

impl ResiliencyResponse {
    pub fn from_payload(payload: &Payload) -> Result<Self, TransportError> {
        serde_json::from_value(payload.clone())
            .map_err(|e| TransportError::new(Code::Internal, e.to_string()))
    }
}

use serde::{Deserialize, Serialize};

/// Outcome of a token request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenResultStatus {
    BadRequest,
    TooManyRequest,
    Fail,
    Ok,
    Blocked,
    ShouldWait,
    NoRuleExists,
    NoRefRuleExists,
    NotAvailable,
    /// A status code this crate does not know.
    Unknown(i32),
}

impl TokenResultStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            -4 => Self::BadRequest,
            -2 => Self::TooManyRequest,
            -1 => Self::Fail,
            0 => Self::Ok,
            1 => Self::Blocked,
            2 => Self::ShouldWait,
            3 => Self::NoRuleExists,
            4 => Self::NoRefRuleExists,
            5 => Self::NotAvailable,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::BadRequest => -4,
            Self::TooManyRequest => -2,
            Self::Fail => -1,
            Self::Ok => 0,
            Self::Blocked => 1,
            Self::ShouldWait => 2,
            Self::NoRuleExists => 3,
            Self::NoRefRuleExists => 4,
            Self::NotAvailable => 5,
            Self::Unknown(code) => *code,
        }
    }
}

impl Serialize for TokenResultStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for TokenResultStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i32::deserialize(deserializer).map(Self::from_code)
    }
}

/// Answer of a token service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResult {
    pub status: TokenResultStatus,
    #[serde(default)]
    pub remaining: i64,
    /// Suggested delay before proceeding, for [`TokenResultStatus::ShouldWait`].
    #[serde(default)]
    pub wait_ms: u64,
}

impl TokenResult {
    pub fn new(status: TokenResultStatus) -> Self {
        Self {
            status,
            remaining: 0,
            wait_ms: 0,
        }
    }

    pub fn ok(remaining: i64) -> Self {
        Self {
            remaining,
            ..Self::new(TokenResultStatus::Ok)
        }
    }

    pub fn should_wait(wait_ms: u64) -> Self {
        Self {
            wait_ms,
            ..Self::new(TokenResultStatus::ShouldWait)
        }
    }
}

/// Grants or refuses cluster flow tokens.
///
/// Implementations bound their own latency: a request must resolve, with an
/// error if need be, within the transport's timeout.
pub trait TokenService: Send + Sync {
    fn request_token(
        &self,
        flow_id: u64,
        acquire_count: u32,
        prioritized: bool,
    ) -> crate::Result<TokenResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        for code in -4..=5 {
            let status = TokenResultStatus::from_code(code);
            assert_eq!(status.code(), code);
        }
        assert_eq!(TokenResultStatus::from_code(-3), TokenResultStatus::Unknown(-3));
        assert_eq!(TokenResultStatus::from_code(2), TokenResultStatus::ShouldWait);
    }

    #[test]
    fn test_result_from_json() {
        let result: TokenResult = serde_json::from_str(r#"{"status": 2, "wait_ms": 30}"#).unwrap();
        assert_eq!(result, TokenResult::should_wait(30));

        let json = serde_json::to_string(&TokenResult::ok(7)).unwrap();
        assert!(json.contains("\"status\":0"));
    }
}

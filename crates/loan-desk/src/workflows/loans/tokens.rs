use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;

use super::domain::{RequestId, ResponseToken, TokenId};
use super::errors::WorkflowError;
use super::store::LedgerTables;

const TOKEN_BYTES: usize = 32;

/// Issues response tokens with a fixed validity window.
#[derive(Debug, Clone, Copy)]
pub struct TokenIssuer {
    validity: Duration,
}

/// What the caller needs to hand a building: the opaque token and when it stops working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenGrant {
    pub request_id: RequestId,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenIssuer {
    pub fn new(validity_hours: u32) -> Self {
        Self {
            validity: Duration::hours(i64::from(validity_hours)),
        }
    }

    pub fn issue(
        &self,
        tables: &mut LedgerTables,
        request_id: &RequestId,
        now: DateTime<Utc>,
    ) -> Result<TokenGrant, WorkflowError> {
        if tables.request(request_id).is_none() {
            return Err(WorkflowError::not_found("request", request_id));
        }

        let mut token = generate_token();
        while tables.token_by_value(&token).is_some() {
            token = generate_token();
        }

        let record = ResponseToken {
            id: TokenId::generate(),
            request_id: request_id.clone(),
            token,
            created_at: now,
            expires_at: now + self.validity,
            used: false,
            finished: false,
        };
        let grant = TokenGrant {
            request_id: request_id.clone(),
            token: record.token.clone(),
            expires_at: record.expires_at,
        };
        tables.tokens.push(record);
        Ok(grant)
    }
}

/// 32 bytes from the operating system generator, hex encoded so it is safe in URLs.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Look up a token record without judging it.
pub fn validate<'a>(tables: &'a LedgerTables, token: &str) -> Option<&'a ResponseToken> {
    tables.token_by_value(token)
}

/// Resolve a token that must still accept form access or submissions.
pub fn resolve_usable<'a>(
    tables: &'a LedgerTables,
    token: &str,
    now: DateTime<Utc>,
) -> Result<&'a ResponseToken, WorkflowError> {
    let record = validate(tables, token).ok_or(WorkflowError::InvalidToken)?;
    if record.is_expired(now) {
        return Err(WorkflowError::Expired);
    }
    if record.finished {
        return Err(WorkflowError::Completed);
    }
    Ok(record)
}

/// Close the response window for every token of a request.
pub fn finish_all(tables: &mut LedgerTables, request_id: &RequestId) -> usize {
    let mut finished = 0;
    for record in tables
        .tokens
        .iter_mut()
        .filter(|record| &record.request_id == request_id)
    {
        if !record.finished {
            record.finished = true;
            finished += 1;
        }
    }
    finished
}

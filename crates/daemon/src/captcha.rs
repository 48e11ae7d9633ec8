// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Arithmetic captcha challenges and reusable session tokens.
//!
//! Challenges are single-use and bound to the requesting client host for
//! ten minutes. Solving one issues a session token (same host binding)
//! with a long sliding TTL, so one solve covers a batch of requests.

use chrono::{DateTime, Utc};
use mfb_core::{Clock, SystemClock};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;

mfb_core::define_id! {
    /// Identifier of one issued challenge.
    pub struct CaptchaId("cap-");
}

mfb_core::define_id! {
    /// Reusable session token issued for a solved challenge.
    pub struct SessionToken("ses-");
}

pub const CHALLENGE_TTL: Duration = Duration::from_secs(10 * 60);
pub const SESSION_TTL: Duration = Duration::from_secs(12 * 3600);

const MAX_ID_LEN: usize = 64;
const MAX_ANSWER_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptchaError {
    #[error("captcha is required")]
    Required,

    #[error("captcha is invalid")]
    Invalid,

    #[error("captcha is invalid or expired")]
    UnknownOrExpired,

    #[error("captcha is invalid for this client")]
    HostMismatch,

    #[error("captcha answer is incorrect")]
    WrongAnswer,

    #[error("captcha session is invalid or expired")]
    SessionInvalid,
}

/// A freshly issued challenge, as returned to the client.
#[derive(Debug, Clone)]
pub struct IssuedChallenge {
    pub id: CaptchaId,
    pub question: String,
    pub expires_at: DateTime<Utc>,
}

struct Challenge {
    answer: String,
    host: String,
    expires_at: DateTime<Utc>,
}

struct Session {
    host: String,
    expires_at: DateTime<Utc>,
}

struct CaptchaState {
    challenges: HashMap<CaptchaId, Challenge>,
    sessions: HashMap<SessionToken, Session>,
}

/// In-memory store of pending challenges and live sessions.
pub struct CaptchaStore<C: Clock = SystemClock> {
    clock: C,
    state: Mutex<CaptchaState>,
}

impl<C: Clock> CaptchaStore<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            state: Mutex::new(CaptchaState {
                challenges: HashMap::new(),
                sessions: HashMap::new(),
            }),
        }
    }

    /// Issue a new arithmetic challenge bound to the client host.
    pub fn issue(&self, host: &str) -> IssuedChallenge {
        let now = self.clock.now_utc();
        let (question, answer) = generate_question(&mut rand::thread_rng());
        let id = CaptchaId::new();
        let expires_at = now + chrono::Duration::from_std(CHALLENGE_TTL).unwrap_or_default();

        let mut state = self.state.lock();
        cleanup(&mut state, now);
        state.challenges.insert(
            id,
            Challenge {
                answer: answer.to_string(),
                host: host.to_string(),
                expires_at,
            },
        );

        IssuedChallenge { id, question, expires_at }
    }

    /// Validate an answer. The challenge is consumed on the first attempt,
    /// right or wrong. A correct answer creates a session for the host.
    pub fn validate(
        &self,
        host: &str,
        captcha_id: &str,
        answer: &str,
    ) -> Result<SessionToken, CaptchaError> {
        let captcha_id = captcha_id.trim();
        let answer = answer.trim();
        if captcha_id.is_empty() || answer.is_empty() {
            return Err(CaptchaError::Required);
        }
        if captcha_id.len() > MAX_ID_LEN || answer.len() > MAX_ANSWER_LEN {
            return Err(CaptchaError::Invalid);
        }

        let now = self.clock.now_utc();
        let mut state = self.state.lock();
        cleanup(&mut state, now);

        let challenge = state
            .challenges
            .remove(captcha_id)
            .ok_or(CaptchaError::UnknownOrExpired)?;

        if challenge.host != host {
            return Err(CaptchaError::HostMismatch);
        }
        if now > challenge.expires_at {
            return Err(CaptchaError::UnknownOrExpired);
        }
        if challenge.answer != answer {
            return Err(CaptchaError::WrongAnswer);
        }

        let token = SessionToken::new();
        state.sessions.insert(
            token,
            Session {
                host: host.to_string(),
                expires_at: now + chrono::Duration::from_std(SESSION_TTL).unwrap_or_default(),
            },
        );
        Ok(token)
    }

    /// Accept a session token in place of a fresh challenge. Success
    /// pushes the expiry forward (sliding TTL).
    pub fn redeem_session(&self, host: &str, token: &str) -> Result<(), CaptchaError> {
        let token = token.trim();
        if token.is_empty() || token.len() > MAX_ID_LEN {
            return Err(CaptchaError::SessionInvalid);
        }

        let now = self.clock.now_utc();
        let mut state = self.state.lock();
        cleanup(&mut state, now);

        let Some(session) = state.sessions.get_mut(token) else {
            return Err(CaptchaError::SessionInvalid);
        };
        if session.host != host || now > session.expires_at {
            state.sessions.remove(token);
            return Err(CaptchaError::SessionInvalid);
        }

        session.expires_at = now + chrono::Duration::from_std(SESSION_TTL).unwrap_or_default();
        Ok(())
    }

    /// Forget a session token. Any captcha failure on a request carrying
    /// a token invalidates that token.
    pub fn drop_session(&self, token: &str) {
        self.state.lock().sessions.remove(token.trim());
    }
}

fn cleanup(state: &mut CaptchaState, now: DateTime<Utc>) {
    state.challenges.retain(|_, challenge| now <= challenge.expires_at);
    state.sessions.retain(|_, session| now <= session.expires_at);
}

/// A short arithmetic question with a whole-number answer: addition,
/// subtraction, multiplication, exact division, the square root of a
/// perfect square, or a parenthesised composition.
fn generate_question(rng: &mut impl Rng) -> (String, i64) {
    match rng.gen_range(0..6) {
        0 => {
            let left = rng.gen_range(3..=25);
            let right = rng.gen_range(2..=20);
            (format!("{} + {} = ?", left, right), left + right)
        }
        1 => {
            let a = rng.gen_range(3..=25);
            let b = rng.gen_range(2..=20);
            let (left, right) = if a >= b { (a, b) } else { (b, a) };
            (format!("{} - {} = ?", left, right), left - right)
        }
        2 => {
            let left = rng.gen_range(2..=12);
            let right = rng.gen_range(2..=9);
            (format!("{} × {} = ?", left, right), left * right)
        }
        3 => {
            let quotient = rng.gen_range(2..=9);
            let divisor = rng.gen_range(2..=9);
            (format!("{} ÷ {} = ?", quotient * divisor, divisor), quotient)
        }
        4 => {
            let root = rng.gen_range(2..=12);
            (format!("√{} = ?", root * root), root)
        }
        _ => {
            let a = rng.gen_range(2..=10);
            let b = rng.gen_range(2..=10);
            let c = rng.gen_range(2..=5);
            (format!("({} + {}) × {} = ?", a, b, c), (a + b) * c)
        }
    }
}

#[cfg(test)]
#[path = "captcha_tests.rs"]
mod tests;

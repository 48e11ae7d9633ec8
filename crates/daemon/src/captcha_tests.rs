// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use mfb_core::FakeClock;
use rand::SeedableRng;

const HOST: &str = "203.0.113.7";
const OTHER_HOST: &str = "198.51.100.2";

fn store() -> (CaptchaStore<FakeClock>, FakeClock) {
    let clock = FakeClock::new();
    (CaptchaStore::new(clock.clone()), clock)
}

/// Solve a challenge by recomputing the answer from its question text.
fn solve(question: &str) -> String {
    let expr = question.trim_end_matches(" = ?");
    if let Some(rest) = expr.strip_prefix('√') {
        let square: i64 = rest.trim().parse().unwrap();
        return ((square as f64).sqrt().round() as i64).to_string();
    }
    if let Some(stripped) = expr.strip_prefix('(') {
        // (a + b) × c
        let (sum, factor) = stripped.split_once(") × ").unwrap();
        let (a, b) = sum.split_once(" + ").unwrap();
        let value = (a.trim().parse::<i64>().unwrap() + b.trim().parse::<i64>().unwrap())
            * factor.trim().parse::<i64>().unwrap();
        return value.to_string();
    }
    for (separator, op) in [
        (" + ", '+'),
        (" - ", '-'),
        (" × ", '*'),
        (" ÷ ", '/'),
    ] {
        if let Some((left, right)) = expr.split_once(separator) {
            let a: i64 = left.trim().parse().unwrap();
            let b: i64 = right.trim().parse().unwrap();
            let value = match op {
                '+' => a + b,
                '-' => a - b,
                '*' => a * b,
                _ => a / b,
            };
            return value.to_string();
        }
    }
    panic!("unrecognised question: {question}");
}

#[test]
fn solving_a_challenge_issues_a_session() {
    let (store, _) = store();
    let challenge = store.issue(HOST);
    let answer = solve(&challenge.question);

    let token = store.validate(HOST, challenge.id.as_str(), &answer).unwrap();
    assert!(token.as_str().starts_with("ses-"));

    store.redeem_session(HOST, token.as_str()).unwrap();
}

#[test]
fn challenges_are_single_use() {
    let (store, _) = store();
    let challenge = store.issue(HOST);

    // First attempt consumes the record, even when wrong.
    let err = store.validate(HOST, challenge.id.as_str(), "999999").unwrap_err();
    assert_eq!(err, CaptchaError::WrongAnswer);

    let answer = solve(&challenge.question);
    let err = store.validate(HOST, challenge.id.as_str(), &answer).unwrap_err();
    assert_eq!(err, CaptchaError::UnknownOrExpired);
}

#[test]
fn challenge_is_bound_to_the_client_host() {
    let (store, _) = store();
    let challenge = store.issue(HOST);
    let answer = solve(&challenge.question);

    let err = store.validate(OTHER_HOST, challenge.id.as_str(), &answer).unwrap_err();
    assert_eq!(err, CaptchaError::HostMismatch);
}

#[test]
fn expired_challenges_are_rejected() {
    let (store, clock) = store();
    let challenge = store.issue(HOST);
    let answer = solve(&challenge.question);

    clock.advance(CHALLENGE_TTL + std::time::Duration::from_secs(1));
    let err = store.validate(HOST, challenge.id.as_str(), &answer).unwrap_err();
    assert_eq!(err, CaptchaError::UnknownOrExpired);
}

#[test]
fn missing_or_oversized_fields_are_rejected() {
    let (store, _) = store();
    assert_eq!(store.validate(HOST, "", "5"), Err(CaptchaError::Required));
    assert_eq!(store.validate(HOST, "cap-x", ""), Err(CaptchaError::Required));
    let long_id = "x".repeat(65);
    assert_eq!(store.validate(HOST, &long_id, "5"), Err(CaptchaError::Invalid));
    let long_answer = "9".repeat(17);
    assert_eq!(
        store.validate(HOST, "cap-x", &long_answer),
        Err(CaptchaError::Invalid)
    );
}

#[test]
fn sessions_slide_and_rebind_on_use() {
    let (store, clock) = store();
    let challenge = store.issue(HOST);
    let answer = solve(&challenge.question);
    let token = store.validate(HOST, challenge.id.as_str(), &answer).unwrap();

    // Just before expiry the session still works, and using it pushes
    // the deadline out again.
    clock.advance(SESSION_TTL - std::time::Duration::from_secs(60));
    store.redeem_session(HOST, token.as_str()).unwrap();

    clock.advance(SESSION_TTL - std::time::Duration::from_secs(60));
    store.redeem_session(HOST, token.as_str()).unwrap();

    clock.advance(SESSION_TTL + std::time::Duration::from_secs(1));
    assert_eq!(
        store.redeem_session(HOST, token.as_str()),
        Err(CaptchaError::SessionInvalid)
    );
}

#[test]
fn sessions_are_bound_to_the_client_host() {
    let (store, _) = store();
    let challenge = store.issue(HOST);
    let answer = solve(&challenge.question);
    let token = store.validate(HOST, challenge.id.as_str(), &answer).unwrap();

    assert_eq!(
        store.redeem_session(OTHER_HOST, token.as_str()),
        Err(CaptchaError::SessionInvalid)
    );
    // The host-mismatched attempt burned the session.
    assert_eq!(
        store.redeem_session(HOST, token.as_str()),
        Err(CaptchaError::SessionInvalid)
    );
}

#[test]
fn dropped_sessions_stop_working() {
    let (store, _) = store();
    let challenge = store.issue(HOST);
    let answer = solve(&challenge.question);
    let token = store.validate(HOST, challenge.id.as_str(), &answer).unwrap();

    store.drop_session(token.as_str());
    assert_eq!(
        store.redeem_session(HOST, token.as_str()),
        Err(CaptchaError::SessionInvalid)
    );
}

#[test]
fn questions_always_have_integer_answers() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    for _ in 0..200 {
        let (question, answer) = generate_question(&mut rng);
        assert_eq!(solve(&question), answer.to_string(), "question {question}");
    }
}

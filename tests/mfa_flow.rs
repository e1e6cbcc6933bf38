//! End-to-end MFA behavior: enrollment, TOTP windows, backup codes, attempt
//! throttling, disable, and backup-code regeneration.

use chrono::{Duration, TimeZone, Utc};
use omnisec_auth::{
    Clock, CoreConfig, Error, ManualClock, MemoryTtlStore, MemoryUserStore, MfaService,
    TracingAuditSink, UserStore,
};
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

const ISSUER: &str = "OmnisecAI Test";
const SOURCE: &str = "198.51.100.7";

struct Harness {
    mfa: MfaService,
    users: Arc<MemoryUserStore>,
    clock: Arc<ManualClock>,
}

/// Route audit events to the test writer; `RUST_LOG` controls verbosity.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn harness() -> Harness {
    init_tracing();
    let start = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).single().unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let store = Arc::new(MemoryTtlStore::new(clock.clone()));
    let users = Arc::new(MemoryUserStore::new());
    let mfa = MfaService::new(
        store,
        users.clone(),
        clock.clone(),
        Arc::new(TracingAuditSink),
        CoreConfig::new().with_issuer(ISSUER),
    );
    Harness { mfa, users, clock }
}

fn totp_for(secret: &str) -> TOTP {
    TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        Secret::Encoded(secret.to_string()).to_bytes().unwrap(),
        Some(ISSUER.to_string()),
        "user@example.com".to_string(),
    )
    .unwrap()
}

fn code_at(secret: &str, at: u64) -> String {
    totp_for(secret).generate(at)
}

/// A six-digit code guaranteed invalid for the whole ±1-step window at `at`.
fn wrong_code(secret: &str, at: u64) -> String {
    let totp = totp_for(secret);
    let valid = [
        totp.generate(at - 30),
        totp.generate(at),
        totp.generate(at + 30),
    ];
    ["000000", "000001", "000002", "000003"]
        .into_iter()
        .map(str::to_string)
        .find(|candidate| !valid.contains(candidate))
        .unwrap()
}

/// A well-formed backup code guaranteed not to be in `codes`.
fn missing_code(codes: &[String]) -> String {
    (0..=codes.len())
        .map(|i| format!("0000-{i:04X}"))
        .find(|candidate| !codes.contains(candidate))
        .unwrap()
}

async fn enroll(h: &Harness) -> (Uuid, String, Vec<String>) {
    let subject = Uuid::new_v4();
    let bundle = h
        .mfa
        .generate_setup(subject, "user@example.com")
        .await
        .unwrap();
    let code = code_at(&bundle.secret, h.clock.unix_timestamp());
    let codes = h
        .mfa
        .verify_setup(&bundle.setup_token, &code, subject)
        .await
        .unwrap();
    (subject, bundle.secret, codes)
}

fn assert_backup_code_format(codes: &[String]) {
    assert_eq!(codes.len(), 10);
    let unique: std::collections::HashSet<&String> = codes.iter().collect();
    assert_eq!(unique.len(), 10, "backup codes must be unique");
    for code in codes {
        let bytes = code.as_bytes();
        assert_eq!(bytes.len(), 9, "bad code: {code}");
        assert_eq!(bytes[4], b'-', "bad code: {code}");
        for (i, ch) in code.chars().enumerate() {
            if i == 4 {
                continue;
            }
            assert!(
                ch.is_ascii_hexdigit() && !ch.is_ascii_lowercase(),
                "bad code: {code}"
            );
        }
    }
}

#[tokio::test]
async fn enrollment_happy_path() {
    let h = harness();
    let subject = Uuid::new_v4();

    let bundle = h
        .mfa
        .generate_setup(subject, "user@example.com")
        .await
        .unwrap();
    assert_backup_code_format(&bundle.backup_codes);
    assert!(bundle.provisioning_uri.starts_with("otpauth://totp/"));
    assert!(!bundle.qr_png_base64.is_empty());
    assert!(!bundle.secret.is_empty());

    // Nothing is committed until the first code verifies.
    assert_eq!(h.users.mfa_profile(subject).await.unwrap(), None);

    let code = code_at(&bundle.secret, h.clock.unix_timestamp());
    let codes = h
        .mfa
        .verify_setup(&bundle.setup_token, &code, subject)
        .await
        .unwrap();
    assert_eq!(codes, bundle.backup_codes);

    let profile = h.users.mfa_profile(subject).await.unwrap().unwrap();
    assert!(profile.enabled);
    assert_eq!(profile.secret.as_deref(), Some(bundle.secret.as_str()));
    assert_eq!(profile.backup_codes, bundle.backup_codes);

    // The setup token is gone; the session cannot be replayed.
    let err = h
        .mfa
        .verify_setup(&bundle.setup_token, &code, subject)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidSetupToken | Error::AlreadyEnabled
    ));
}

#[tokio::test]
async fn setup_token_is_bound_to_its_subject() {
    let h = harness();
    let subject = Uuid::new_v4();
    let intruder = Uuid::new_v4();

    let bundle = h
        .mfa
        .generate_setup(subject, "user@example.com")
        .await
        .unwrap();
    let code = code_at(&bundle.secret, h.clock.unix_timestamp());

    let err = h
        .mfa
        .verify_setup(&bundle.setup_token, &code, intruder)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidSetupToken));
    assert_eq!(h.users.mfa_profile(intruder).await.unwrap(), None);
}

#[tokio::test]
async fn wrong_code_keeps_the_session_alive() {
    let h = harness();
    let subject = Uuid::new_v4();

    let bundle = h
        .mfa
        .generate_setup(subject, "user@example.com")
        .await
        .unwrap();
    let now = h.clock.unix_timestamp();

    let err = h
        .mfa
        .verify_setup(&bundle.setup_token, &wrong_code(&bundle.secret, now), subject)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTotpCode));
    // Enrollment atomicity: nothing committed on failure.
    assert_eq!(h.users.mfa_profile(subject).await.unwrap(), None);

    // A retry with the right code still succeeds.
    let codes = h
        .mfa
        .verify_setup(&bundle.setup_token, &code_at(&bundle.secret, now), subject)
        .await
        .unwrap();
    assert_eq!(codes, bundle.backup_codes);
}

#[tokio::test]
async fn abandoned_enrollment_expires() {
    let h = harness();
    let subject = Uuid::new_v4();

    let bundle = h
        .mfa
        .generate_setup(subject, "user@example.com")
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(11));

    let code = code_at(&bundle.secret, h.clock.unix_timestamp());
    let err = h
        .mfa
        .verify_setup(&bundle.setup_token, &code, subject)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidSetupToken));
    assert_eq!(h.users.mfa_profile(subject).await.unwrap(), None);
}

#[tokio::test]
async fn generate_setup_refuses_enabled_subjects() {
    let h = harness();
    let (subject, _secret, _codes) = enroll(&h).await;

    let err = h
        .mfa
        .generate_setup(subject, "user@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyEnabled));
}

#[tokio::test]
async fn totp_window_tolerates_one_step_of_skew() {
    let h = harness();
    let (subject, secret, _codes) = enroll(&h).await;
    let now = h.clock.unix_timestamp();

    assert!(h
        .mfa
        .verify_totp(subject, &code_at(&secret, now), SOURCE)
        .await
        .unwrap());
    assert!(h
        .mfa
        .verify_totp(subject, &code_at(&secret, now - 30), SOURCE)
        .await
        .unwrap());
    assert!(h
        .mfa
        .verify_totp(subject, &code_at(&secret, now + 30), SOURCE)
        .await
        .unwrap());

    assert!(!h
        .mfa
        .verify_totp(subject, &wrong_code(&secret, now), SOURCE)
        .await
        .unwrap());
    assert!(!h
        .mfa
        .verify_totp(subject, &code_at(&secret, now - 300), SOURCE)
        .await
        .unwrap());
}

#[tokio::test]
async fn verify_totp_requires_enrollment() {
    let h = harness();
    let err = h
        .mfa
        .verify_totp(Uuid::new_v4(), "123456", SOURCE)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MfaNotEnabled));
}

#[tokio::test]
async fn totp_rate_limit_kicks_in_after_five_failures() {
    let h = harness();
    let (subject, secret, _codes) = enroll(&h).await;
    let now = h.clock.unix_timestamp();
    let bad = wrong_code(&secret, now);

    for _ in 0..5 {
        assert!(!h.mfa.verify_totp(subject, &bad, SOURCE).await.unwrap());
    }

    // Even the correct code is refused once the budget is spent.
    let err = h
        .mfa
        .verify_totp(subject, &code_at(&secret, now), SOURCE)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RateLimitExceeded));

    // A different source address has its own budget.
    assert!(h
        .mfa
        .verify_totp(subject, &code_at(&secret, now), "203.0.113.9")
        .await
        .unwrap());
}

#[tokio::test]
async fn success_clears_the_attempt_window() {
    let h = harness();
    let (subject, secret, _codes) = enroll(&h).await;
    let now = h.clock.unix_timestamp();
    let bad = wrong_code(&secret, now);

    for _ in 0..4 {
        assert!(!h.mfa.verify_totp(subject, &bad, SOURCE).await.unwrap());
    }
    assert!(h
        .mfa
        .verify_totp(subject, &code_at(&secret, now), SOURCE)
        .await
        .unwrap());

    // The counter was deleted, so a fresh window starts at the next failure.
    for _ in 0..4 {
        assert!(!h.mfa.verify_totp(subject, &bad, SOURCE).await.unwrap());
    }
    assert!(h
        .mfa
        .verify_totp(subject, &code_at(&secret, now), SOURCE)
        .await
        .unwrap());
}

#[tokio::test]
async fn rate_limit_window_expires_naturally() {
    let h = harness();
    let (subject, secret, _codes) = enroll(&h).await;
    let bad = wrong_code(&secret, h.clock.unix_timestamp());

    for _ in 0..5 {
        assert!(!h.mfa.verify_totp(subject, &bad, SOURCE).await.unwrap());
    }
    assert!(matches!(
        h.mfa.verify_totp(subject, &bad, SOURCE).await,
        Err(Error::RateLimitExceeded)
    ));

    h.clock.advance(Duration::minutes(16));
    let now = h.clock.unix_timestamp();
    assert!(h
        .mfa
        .verify_totp(subject, &code_at(&secret, now), SOURCE)
        .await
        .unwrap());
}

#[tokio::test]
async fn backup_codes_are_single_use() {
    let h = harness();
    let (subject, _secret, codes) = enroll(&h).await;

    let first = codes[0].to_lowercase();
    let check = h
        .mfa
        .verify_backup_code(subject, &first, SOURCE)
        .await
        .unwrap();
    assert!(check.ok);
    assert_eq!(check.remaining, 9);

    let profile = h.users.mfa_profile(subject).await.unwrap().unwrap();
    assert_eq!(profile.backup_codes.len(), 9);
    assert!(!profile.backup_codes.contains(&codes[0]));

    // The same code cannot be used twice.
    let replay = h
        .mfa
        .verify_backup_code(subject, &first, SOURCE)
        .await
        .unwrap();
    assert!(!replay.ok);
    assert_eq!(replay.remaining, 9);
}

#[tokio::test]
async fn malformed_backup_codes_count_against_the_budget() {
    let h = harness();
    let (subject, _secret, codes) = enroll(&h).await;

    for _ in 0..5 {
        let err = h
            .mfa
            .verify_backup_code(subject, "definitely-not-a-code", SOURCE)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidBackupCode));
    }

    let err = h
        .mfa
        .verify_backup_code(subject, &codes[0], SOURCE)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RateLimitExceeded));
}

#[tokio::test]
async fn backup_code_success_clears_the_counter() {
    let h = harness();
    let (subject, _secret, codes) = enroll(&h).await;
    let absent = missing_code(&codes);

    for _ in 0..4 {
        let check = h
            .mfa
            .verify_backup_code(subject, &absent, SOURCE)
            .await
            .unwrap();
        assert!(!check.ok);
    }
    let check = h
        .mfa
        .verify_backup_code(subject, &codes[1], SOURCE)
        .await
        .unwrap();
    assert!(check.ok);

    // Fresh budget after the success.
    for _ in 0..4 {
        let check = h
            .mfa
            .verify_backup_code(subject, &absent, SOURCE)
            .await
            .unwrap();
        assert!(!check.ok);
    }
    let check = h
        .mfa
        .verify_backup_code(subject, &codes[2], SOURCE)
        .await
        .unwrap();
    assert!(check.ok);
}

#[tokio::test]
async fn disable_requires_a_valid_code() {
    let h = harness();
    let (subject, secret, _codes) = enroll(&h).await;
    let now = h.clock.unix_timestamp();

    let err = h
        .mfa
        .disable(subject, &wrong_code(&secret, now), SOURCE)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTotpCode));
    assert!(h.users.mfa_profile(subject).await.unwrap().unwrap().enabled);

    h.mfa
        .disable(subject, &code_at(&secret, now), SOURCE)
        .await
        .unwrap();
    let profile = h.users.mfa_profile(subject).await.unwrap().unwrap();
    assert!(!profile.enabled);
    assert_eq!(profile.secret, None);
    assert!(profile.backup_codes.is_empty());

    // Back in the disabled state, verification is a precondition error.
    assert!(matches!(
        h.mfa
            .verify_totp(subject, &code_at(&secret, now), SOURCE)
            .await,
        Err(Error::MfaNotEnabled)
    ));
}

#[tokio::test]
async fn disable_then_reenroll() {
    let h = harness();
    let (subject, secret, _codes) = enroll(&h).await;
    let now = h.clock.unix_timestamp();

    h.mfa
        .disable(subject, &code_at(&secret, now), SOURCE)
        .await
        .unwrap();

    let bundle = h
        .mfa
        .generate_setup(subject, "user@example.com")
        .await
        .unwrap();
    assert_ne!(bundle.secret, secret);
}

#[tokio::test]
async fn regenerate_replaces_the_whole_list() {
    let h = harness();
    let (subject, secret, old_codes) = enroll(&h).await;
    let now = h.clock.unix_timestamp();

    let err = h
        .mfa
        .regenerate_backup_codes(subject, &wrong_code(&secret, now), SOURCE)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTotpCode));

    let new_codes = h
        .mfa
        .regenerate_backup_codes(subject, &code_at(&secret, now), SOURCE)
        .await
        .unwrap();
    assert_backup_code_format(&new_codes);
    assert_ne!(new_codes, old_codes);

    // Old codes are dead; new codes verify.
    let old = h
        .mfa
        .verify_backup_code(subject, &old_codes[0], SOURCE)
        .await
        .unwrap();
    assert!(!old.ok);
    let fresh = h
        .mfa
        .verify_backup_code(subject, &new_codes[0], SOURCE)
        .await
        .unwrap();
    assert!(fresh.ok);
    assert_eq!(fresh.remaining, 9);
}

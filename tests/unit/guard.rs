use relay_hub::guard::{
    digits_only, is_opt_out_text, session_open, DenyReason, SendDecision, SESSION_WINDOW_MS,
};

#[test]
fn test_opt_out_exact_keywords() {
    for text in ["STOP", "stop", " Unsubscribe ", "cancel", "END", "quit"] {
        assert!(is_opt_out_text(text), "{text}");
    }
}

#[test]
fn test_opt_out_keyword_inside_sentence() {
    assert!(is_opt_out_text("please stop"));
    assert!(is_opt_out_text("I said STOP now"));
    assert!(is_opt_out_text("stop sending me these"));
    assert!(is_opt_out_text("Stop!"));
    assert!(is_opt_out_text("ok, unsubscribe."));
}

#[test]
fn test_opt_out_ignores_partial_words() {
    for text in ["stopwatch", "nonstop", "weekend", "cancellation fee?", "quite nice", ""] {
        assert!(!is_opt_out_text(text), "{text}");
    }
}

#[test]
fn test_session_window_boundary() {
    let last = 1_700_000_000_000;
    let almost = 23 * 60 * 60 * 1000 + 59 * 60 * 1000 + 59 * 1000;
    assert!(session_open(Some(last), last + almost));
    assert!(session_open(Some(last), last + SESSION_WINDOW_MS - 1));
    assert!(!session_open(Some(last), last + SESSION_WINDOW_MS));
    assert!(!session_open(Some(last), last + SESSION_WINDOW_MS + 1));
    assert!(!session_open(None, last));
}

#[test]
fn test_digits_only() {
    assert_eq!(digits_only("+62 812-3456-7890"), "6281234567890");
    assert_eq!(digits_only("abc"), "");
}

#[test]
fn test_deny_reason_strings() {
    assert_eq!(DenyReason::SessionExpired.as_str(), "session_expired");
    assert_eq!(DenyReason::RecipientOptedOut.as_str(), "recipient_opted_out");
    assert_eq!(DenyReason::NotWhitelisted.as_str(), "not_whitelisted");
}

#[test]
fn test_decision_serializes_reason() {
    let value = serde_json::to_value(SendDecision::deny(DenyReason::SessionExpired)).unwrap();
    assert_eq!(value["allowed"], false);
    assert_eq!(value["reason"], "session_expired");
    let value = serde_json::to_value(SendDecision::allow()).unwrap();
    assert_eq!(value["allowed"], true);
    assert!(value["reason"].is_null());
}

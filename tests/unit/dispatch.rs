use relay_hub::channels::graph::ChannelError;
use relay_hub::dispatch::backoff_delay;
use relay_hub::types::CampaignStatus;
use std::time::Duration;

#[test]
fn test_backoff_is_linear_in_attempt() {
    assert_eq!(backoff_delay(1200, 1), Duration::from_millis(1200));
    assert_eq!(backoff_delay(1200, 2), Duration::from_millis(2400));
    assert_eq!(backoff_delay(1200, 3), Duration::from_millis(3600));
}

#[test]
fn test_backoff_attempt_zero_counts_as_first() {
    assert_eq!(backoff_delay(500, 0), Duration::from_millis(500));
}

#[test]
fn test_only_rate_limit_is_retryable() {
    assert!(ChannelError::RateLimited {
        status: 429,
        body: String::new()
    }
    .is_rate_limited());
    assert!(!ChannelError::Rejected {
        status: 400,
        body: String::new()
    }
    .is_rate_limited());
    assert!(!ChannelError::Timeout.is_rate_limited());
}

#[test]
fn test_terminal_campaign_states() {
    assert!(CampaignStatus::Finished.is_terminal());
    assert!(CampaignStatus::Failed.is_terminal());
    assert!(!CampaignStatus::Draft.is_terminal());
    assert!(!CampaignStatus::Running.is_terminal());
    assert_eq!(CampaignStatus::parse("running"), Some(CampaignStatus::Running));
    assert_eq!(CampaignStatus::parse("paused"), None);
}

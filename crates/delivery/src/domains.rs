//! Optional per-recipient-domain throttles.
//!
//! Mailbox providers tolerate very different inbound rates; operators
//! can cap specific domains (or ISP aliases) below the campaign
//! throttle. A throttled item goes back to the queue and does not
//! count as a failure.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use crate::rate::TokenBucket;

pub struct DomainThrottle {
    rules: HashMap<String, u64>,
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl DomainThrottle {
    /// Build from (domain, rpm) rules. Domains without a rule are
    /// never throttled.
    pub fn new(rules: Vec<(String, u64)>) -> Self {
        Self {
            rules: rules.into_iter().collect(),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.rules.is_empty()
    }

    /// Admit one message to `recipient`'s domain.
    pub fn admit(&self, recipient: &str) -> bool {
        if self.rules.is_empty() {
            return true;
        }
        let Some(domain) = recipient.rsplit_once('@').map(|(_, d)| d.to_ascii_lowercase())
        else {
            return true;
        };
        let Some(&rpm) = self.rules.get(&domain) else {
            return true;
        };

        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets
            .entry(domain.clone())
            .or_insert_with(|| TokenBucket::new(rpm));
        let admitted = bucket.try_take(1).is_ok();
        if !admitted {
            debug!(domain = %domain, "domain throttle deferred item");
        }
        admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unruled_domains_always_pass() {
        let throttle = DomainThrottle::new(vec![("gmail.com".into(), 1)]);
        for _ in 0..100 {
            assert!(throttle.admit("a@example.com"));
        }
    }

    #[test]
    fn ruled_domain_caps_at_bucket() {
        let throttle = DomainThrottle::new(vec![("gmail.com".into(), 10)]);
        let mut admitted = 0;
        for _ in 0..20 {
            if throttle.admit("user@gmail.com") {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }

    #[test]
    fn domain_match_is_case_insensitive() {
        let throttle = DomainThrottle::new(vec![("gmail.com".into(), 1)]);
        assert!(throttle.admit("a@GMAIL.COM"));
        assert!(!throttle.admit("b@gmail.com"));
    }

    #[test]
    fn malformed_addresses_pass_through() {
        let throttle = DomainThrottle::new(vec![("gmail.com".into(), 1)]);
        assert!(throttle.admit("not-an-address"));
    }

    #[test]
    fn unconfigured_throttle_is_a_no_op() {
        let throttle = DomainThrottle::new(Vec::new());
        assert!(!throttle.is_configured());
        assert!(throttle.admit("a@gmail.com"));
    }
}

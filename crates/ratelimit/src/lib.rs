//! Per-user-per-endpoint-group token-bucket admission control. Each group
//! gets its own keyed limiter (one bucket per user), so a hot group never
//! starves another and there is no single global lock.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter as GovernorLimiter};
use uuid::Uuid;

use sync_domain::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointGroup {
    Push,
    Pull,
    Control,
    Wipe,
}

type KeyedLimiter = GovernorLimiter<Uuid, DefaultKeyedStateStore<Uuid>, DefaultClock>;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitDefaults {
    pub push_rpm: u32,
    pub push_burst: u32,
    pub pull_rpm: u32,
    pub pull_burst: u32,
    pub control_rpm: u32,
    pub control_burst: u32,
    pub wipe_per_hour: u32,
}

impl Default for RateLimitDefaults {
    fn default() -> Self {
        RateLimitDefaults {
            push_rpm: 60,
            push_burst: 10,
            pull_rpm: 120,
            pull_burst: 20,
            control_rpm: 30,
            control_burst: 5,
            wipe_per_hour: 1,
        }
    }
}

fn quota_per_minute(rpm: u32, burst: u32) -> Quota {
    let burst = NonZeroU32::new(burst.max(1)).unwrap();
    Quota::per_minute(NonZeroU32::new(rpm.max(1)).unwrap()).allow_burst(burst)
}

pub struct RateLimiter {
    push: KeyedLimiter,
    pull: KeyedLimiter,
    control: KeyedLimiter,
    wipe: KeyedLimiter,
    defaults: RateLimitDefaults,
}

impl RateLimiter {
    pub fn new(defaults: RateLimitDefaults) -> Arc<Self> {
        Arc::new(RateLimiter {
            push: GovernorLimiter::keyed(quota_per_minute(defaults.push_rpm, defaults.push_burst)),
            pull: GovernorLimiter::keyed(quota_per_minute(defaults.pull_rpm, defaults.pull_burst)),
            control: GovernorLimiter::keyed(quota_per_minute(defaults.control_rpm, defaults.control_burst)),
            wipe: GovernorLimiter::keyed(Quota::per_hour(NonZeroU32::new(defaults.wipe_per_hour.max(1)).unwrap())),
            defaults,
        })
    }

    /// The configured quotas, for advertising in capability responses.
    pub fn defaults(&self) -> RateLimitDefaults {
        self.defaults
    }

    fn limiter_for(&self, group: EndpointGroup) -> &KeyedLimiter {
        match group {
            EndpointGroup::Push => &self.push,
            EndpointGroup::Pull => &self.pull,
            EndpointGroup::Control => &self.control,
            EndpointGroup::Wipe => &self.wipe,
        }
    }

    /// Admits or rejects a request for `(user_id, group)`. Lazily prunes
    /// idle buckets on the way in rather than running a second sweep task
    /// alongside the session store's.
    pub fn check(&self, user_id: Uuid, group: EndpointGroup) -> Result<(), Error> {
        let limiter = self.limiter_for(group);
        limiter.retain_recent();
        match limiter.check_key(&user_id) {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                Err(Error::RateLimited {
                    retry_after_secs: wait.as_secs().max(1),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_within_burst_then_rejects() {
        let limiter = RateLimiter::new(RateLimitDefaults {
            push_rpm: 60,
            push_burst: 2,
            ..RateLimitDefaults::default()
        });
        let user = Uuid::new_v4();

        assert!(limiter.check(user, EndpointGroup::Push).is_ok());
        assert!(limiter.check(user, EndpointGroup::Push).is_ok());
        let err = limiter.check(user, EndpointGroup::Push).unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));
    }

    #[test]
    fn buckets_are_independent_per_user() {
        let limiter = RateLimiter::new(RateLimitDefaults {
            push_rpm: 60,
            push_burst: 1,
            ..RateLimitDefaults::default()
        });
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        assert!(limiter.check(alice, EndpointGroup::Push).is_ok());
        assert!(limiter.check(alice, EndpointGroup::Push).is_err());
        assert!(limiter.check(bob, EndpointGroup::Push).is_ok());
    }

    #[test]
    fn buckets_are_independent_per_group() {
        let limiter = RateLimiter::new(RateLimitDefaults {
            push_rpm: 60,
            push_burst: 1,
            pull_rpm: 60,
            pull_burst: 5,
            ..RateLimitDefaults::default()
        });
        let user = Uuid::new_v4();

        assert!(limiter.check(user, EndpointGroup::Push).is_ok());
        assert!(limiter.check(user, EndpointGroup::Push).is_err());
        assert!(limiter.check(user, EndpointGroup::Pull).is_ok());
    }

    #[test]
    fn wipe_is_one_per_hour_absolute() {
        let limiter = RateLimiter::new(RateLimitDefaults::default());
        let user = Uuid::new_v4();
        assert!(limiter.check(user, EndpointGroup::Wipe).is_ok());
        assert!(limiter.check(user, EndpointGroup::Wipe).is_err());
    }
}

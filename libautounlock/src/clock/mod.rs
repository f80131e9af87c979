// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use std::{future::Future, time::Duration};

use tokio::time::Instant;

/// Time source for retry rounds and bounded waits
pub trait Clock: Send + Sync {
    /// The current instant
    fn now(&self) -> Instant;

    /// Suspend for `duration`
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// The tokio timer
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

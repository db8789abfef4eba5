// Copyright 2015-2024 Swim Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::num::NonZeroUsize;
use std::time::Duration;

macro_rules! non_zero_usize {
    ($n:literal) => {
        match NonZeroUsize::new($n) {
            Some(n) => n,
            None => panic!("Zero is not a valid channel size."),
        }
    };
}

const DEFAULT_CHAN_SIZE: NonZeroUsize = non_zero_usize!(1024);
const DEFAULT_MAX_PAYLOAD: usize = 64 << 20;
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_POOL_CAPACITY: usize = 64;

/// Configuration parameters for WebSocket connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebSocketConfig {
    /// Capacity of the queue of frames received from the peer (default: 1024).
    pub inbox_capacity: NonZeroUsize,
    /// Capacity of the queue of frames waiting to be sent (default: 1024).
    pub outbox_capacity: NonZeroUsize,
    /// Inbound frames declaring a larger payload fail the connection (default: 64MiB).
    pub max_payload_size: usize,
    /// How long to wait for the peer to close its side after a close frame has been sent
    /// (default: 5s).
    pub close_timeout: Duration,
    /// The maximum number of idle frames retained by a frame pool (default: 64).
    pub pool_capacity: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            inbox_capacity: DEFAULT_CHAN_SIZE,
            outbox_capacity: DEFAULT_CHAN_SIZE,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

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

use crate::protocol::Frame;
use parking_lot::Mutex;
use std::sync::Arc;

/// A pool of reusable frames. Cloning the pool produces another handle to the same frames.
#[derive(Debug, Clone)]
pub struct FramePool {
    capacity: usize,
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl Default for FramePool {
    fn default() -> Self {
        FramePool::new(0)
    }
}

impl FramePool {
    /// # Arguments
    /// * `capacity` - The maximum number of idle frames to retain. Frames released to a full
    ///   pool are dropped.
    pub fn new(capacity: usize) -> FramePool {
        FramePool {
            capacity,
            frames: Arc::new(Mutex::new(Vec::with_capacity(capacity))),
        }
    }

    /// Takes an idle frame from the pool or creates a new one. The frame is always in its reset
    /// state.
    pub fn acquire(&self) -> Frame {
        self.frames.lock().pop().unwrap_or_default()
    }

    /// Resets a frame and returns it to the pool.
    pub fn release(&self, mut frame: Frame) {
        let FramePool { capacity, frames } = self;
        frame.reset();
        let mut guard = frames.lock();
        if guard.len() < *capacity {
            guard.push(frame);
        }
    }

    /// The number of idle frames held by the pool.
    pub fn idle(&self) -> usize {
        self.frames.lock().len()
    }
}

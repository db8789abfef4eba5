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

//! Integration of the `swimos_websocket` opening handshake with the [`hyper`] HTTP server. An
//! upgrade request received by a hyper service is negotiated with [`negotiate_upgrade`] and the
//! upgraded socket is then passed to [`swimos_websocket::Server::serve`].

mod websocket;

pub use websocket::{
    fail_upgrade, negotiate_upgrade, upgrade, NoUnwrap, SockUnwrap, Upgrade, UpgradeFuture,
    UpgradeStatus,
};

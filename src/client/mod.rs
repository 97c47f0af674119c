// SPDX-License-Identifier: Apache-2.0

#![allow(clippy::module_inception)]
pub mod client;

//! Warden Network Index
//!
//! Membership tests for client addresses against lists of individual
//! addresses and CIDR blocks, IPv4 and IPv6 handled independently.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    contains(ip)                           │
//! │                                                           │
//! │  ┌──────────────┐   Miss   ┌─────────────────────────┐    │
//! │  │ Segment Trie │────────►│  Range Tree (per family) │    │
//! │  │ (exact IPs)  │         │  max_end augmented       │    │
//! │  └──────────────┘         └─────────────────────────┘    │
//! │        │ Hit                        │                     │
//! │        ▼                            ▼                     │
//! │     [member]                [member | not member]         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The whole structure sits behind an `ArcSwap`; rebuilds publish a new
//! snapshot and readers keep whichever one they loaded.

#![warn(missing_docs)]

pub mod entry;
pub mod index;
pub mod range_tree;
pub mod trie;

pub use entry::{parse_list, CidrRange, ListEntry, Span};
pub use index::{IndexSnapshot, IndexStats, LookupStrategy, NetworkIndex};

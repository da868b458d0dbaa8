//! Concrete operator nodes (spec §4.2). Each submodule groups operators by
//! shape rather than by name, mirroring how the teacher's `collection.rs`
//! groups `MapOp`/`FilterOp`/`FlatMapOp` together as "stateless" ops and
//! keeps `CombineGlobal`/`GroupByKey` in `node.rs` separately.

pub mod aggregate;
pub mod binary;
pub mod search;
pub mod setops;
pub mod sort_op;
pub mod source;
pub mod unary;

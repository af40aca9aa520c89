// scriptum-integrity: annotation integrity verification for Scriptum documents.
//
// Data flow: edits land on a `DocumentSession` → the dirty tracker records
// touched blocks → the checkpoint scheduler picks a full or dirty scan → the
// integrity scanner recomputes span/chain hashes against the current
// document state and reports `CompareMismatch`es.

pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod corpus;
pub mod engine;
pub mod hash;
pub mod index;
pub mod replica;
pub mod scanner;

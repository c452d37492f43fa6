//! Integration tests for the collection/key store surface: CRUD, metadata
//! semantics, counts, and enumeration, all through the public facade.


mod basic;
mod metadata;

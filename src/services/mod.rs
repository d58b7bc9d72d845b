//! Services behind the media handler: object store access, token
//! verification, the edge cache, and `MediaService` which bundles them.

pub mod auth_service;
pub mod cache_service;
pub mod media_service;
pub mod storage_service;

#[cfg(test)]
pub mod testing;

//! envstack-state: capabilities and persistence for envstack
//!
//! This crate defines the seams between the deployment core and the outside
//! world, and the record of what has been applied per environment.
//!
//! ## Layer 0 - Capabilities/Persistence
//!
//! Focus: narrow provider contracts, opaque secrets, durable stack state.
//!
//! ## Key Components
//!
//! - `ConfigSource`, `NamespaceProvider`, `SecretProvider`,
//!   `RemoteEnvironmentProvider`, `ManifestApplier`: provider capabilities
//! - `StackState` / `StateStore`: applied-resource records per environment
//! - `SecretValue`: credential wrapper that never prints its contents
//! - `fakes`: in-memory implementations for tests

mod error;
pub mod fakes;
pub mod provider_traits;
mod secret;
pub mod stack_state;

pub use error::{ProviderError, StateError};
pub use provider_traits::{
    ConfigSource, EnvironmentHandle, ManifestApplier, NamespaceHandle, NamespaceProvider,
    ProviderResult, RemoteEnvironmentProvider, ResourceHandle, ResourceKey, ResourceKind,
    SecretHandle, SecretProvider, SecretRequest, WorkloadHandle,
};
pub use secret::SecretValue;
pub use stack_state::{FileStateStore, ResourceRecord, StackState, StateResult, StateStore};

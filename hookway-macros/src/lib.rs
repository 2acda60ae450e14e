//! Procedural macros for Hookway.
//!
//! - `#[derive(Resolver)]` - wire an event struct into hook chains
//! - `#[derive(Bind)]` - form binding field descriptors for request structs

use proc_macro::TokenStream;

mod bind;
mod resolver;

/// Implement `hookway::Resolver` for a struct embedding an `Event<Self>`.
///
/// The continuation field is the one marked `#[event]`, or else the only
/// field whose type is named `Event`.
///
/// ```rust,ignore
/// #[derive(Resolver)]
/// struct SaveEvent {
///     event: Event<SaveEvent>,
///     record_id: String,
/// }
/// ```
#[proc_macro_derive(Resolver, attributes(event))]
pub fn derive_resolver(input: TokenStream) -> TokenStream {
    resolver::derive_resolver_impl(input)
}

/// Implement `hookway::binder::Bindable` for a struct with named fields.
///
/// Field attributes:
/// - `#[bind(form = "name")]` - the key under a tag key (`form` by default)
/// - `#[bind(form = "-")]` - never bind the field
/// - `#[bind(flatten)]` - bind the fields of an embedded struct in place
/// - `#[bind(nested)]` - bind a sub-struct under `name.` keys
///
/// The struct must also be `serde::Serialize + serde::de::DeserializeOwned`
/// so JSON payloads can be merged over it.
#[proc_macro_derive(Bind, attributes(bind))]
pub fn derive_bind(input: TokenStream) -> TokenStream {
    bind::derive_bind_impl(input)
}

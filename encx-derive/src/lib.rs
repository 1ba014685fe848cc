//! Derive marker for encx-annotated record types.
//!
//! `#[derive(Encx)]` expands to nothing; its only job is to register the
//! `#[encx(...)]` and `#[encx_options(...)]` helper attributes so annotated
//! sources compile. The actual processing code is emitted ahead of time by
//! the `encx-gen` scanner/generator, which reads these attributes from
//! source text.
//!
//! ```ignore
//! use encx::Encx;
//!
//! #[derive(Encx)]
//! #[encx_options(name = "user")]
//! struct User {
//!     id: i64,
//!     #[encx(encrypt, hash_basic)]
//!     email: String,
//!     #[encx(hash_secure)]
//!     password: String,
//! }
//! ```

use proc_macro::TokenStream;

#[proc_macro_derive(Encx, attributes(encx, encx_options))]
pub fn derive_encx(input: TokenStream) -> TokenStream {
    // Parse for early error reporting on malformed items; emit nothing.
    let _ = syn::parse_macro_input!(input as syn::DeriveInput);
    TokenStream::new()
}

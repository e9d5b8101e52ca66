//! Courier Proc Macros
//!
//! Provides `#[rpc_service]`, which derives the server-side contract of a
//! service trait at compile time.
//!
//! # Example
//!
//! ```ignore
//! use courier_core::{rpc_service, CancellationToken, RpcContext, RpcEvent};
//!
//! #[rpc_service]
//! pub trait Files {
//!     fn read(&self, path: String) -> Vec<u8>;
//!     async fn search(&self, query: String, token: CancellationToken) -> Vec<String>;
//!     fn on_changed(&self) -> RpcEvent<String>;
//! }
//!
//! // Generated:
//! // - `FilesServer`: `async fn read(&self, ctx: &RpcContext, path: String) -> Vec<u8>`,
//! //   `async fn search(&self, ctx: &RpcContext, query: String) -> Vec<String>`,
//! //   `fn on_changed(&self) -> &RpcEvent<String>`
//! // - `FilesDispatcher<S>`: an `RpcServer` exposing `$read`, `$search` and `on_changed`
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{ItemTrait, Result};

mod codegen;
mod parsing;

use parsing::{parse_service, ServiceArgs};

/// Derive the server contract of a service trait
///
/// The trait itself is emitted unchanged apart from `#[rpc(...)]` helper
/// attributes. Alongside it the macro generates:
///
/// - `<Trait>Server`: every `&self` method becomes an `async fn` taking
///   `ctx: &RpcContext` first, with a trailing `CancellationToken`
///   parameter removed (cancellation is read from `ctx.request()`) and any
///   awaitable return type replaced by its output. Members returning
///   `RpcEvent<T>` stay events and return `&RpcEvent<T>`.
/// - `<Trait>Dispatcher<S>`: implements `RpcServer` over any
///   `S: <Trait>Server`, decoding positional arguments and encoding replies.
///
/// Method endpoints carry the reserved `$` prefix; event members keep their
/// plain names. Methods without a receiver are excluded.
///
/// # Attributes
///
/// - `#[rpc_service(name = "...")]` - service name used in shapes and errors
/// - `#[rpc(rename = "...")]` - endpoint or event name for one member
/// - `#[rpc(skip)]` - keep a method out of the server contract
///
/// # Errors
///
/// Compilation fails when two members share a name after prefixing, when an
/// event name uses the reserved prefix, or when a member cannot be made
/// remote (`&mut self`, borrowed parameters, generic methods).
#[proc_macro_attribute]
pub fn rpc_service(attr: TokenStream, item: TokenStream) -> TokenStream {
    match rpc_service_impl(attr.into(), item.into()) {
        Ok(output) => output.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn rpc_service_impl(attr: TokenStream2, item: TokenStream2) -> Result<TokenStream2> {
    let args = ServiceArgs::parse(attr)?;
    let mut item: ItemTrait = syn::parse2(item)?;
    let service = parse_service(args, &mut item)?;
    let generated = codegen::generate(&service);

    Ok(quote! {
        #item
        #generated
    })
}

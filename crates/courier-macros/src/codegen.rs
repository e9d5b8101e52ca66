//! Code generation for server traits and dispatchers.

use crate::parsing::{type_label, EventDef, MethodDef, ServiceDef};
use proc_macro2::TokenStream;
use quote::{format_ident, quote};

/// Generate the `<Trait>Server` trait and `<Trait>Dispatcher` for a service.
pub fn generate(service: &ServiceDef) -> TokenStream {
    let server_trait = generate_server_trait(service);
    let dispatcher = generate_dispatcher(service);
    quote! {
        #server_trait
        #dispatcher
    }
}

fn generate_server_trait(service: &ServiceDef) -> TokenStream {
    let vis = &service.vis;
    let trait_ident = &service.trait_ident;
    let server_ident = format_ident!("{}Server", trait_ident);
    let doc = format!(
        "Server-side form of [`{trait_ident}`]: every call receives its `RpcContext` first and \
         cancellation arrives through `ctx.request()`."
    );

    let methods = service.methods.iter().map(|method| {
        let MethodDef {
            ident,
            docs,
            params,
            output,
            ..
        } = method;
        let names = params.iter().map(|p| &p.ident);
        let types = params.iter().map(|p| &p.ty);
        quote! {
            #(#docs)*
            async fn #ident(
                &self,
                ctx: &::courier_core::RpcContext
                #(, #names: #types)*
            ) -> #output;
        }
    });

    let events = service.events.iter().map(|event| {
        let EventDef {
            ident,
            docs,
            payload,
            ..
        } = event;
        quote! {
            #(#docs)*
            fn #ident(&self) -> &::courier_core::RpcEvent<#payload>;
        }
    });

    quote! {
        #[doc = #doc]
        #[::courier_core::async_trait]
        #vis trait #server_ident: ::core::marker::Send + ::core::marker::Sync + 'static {
            #(#methods)*
            #(#events)*
        }
    }
}

fn shape_members(service: &ServiceDef) -> Vec<TokenStream> {
    let methods = service.methods.iter().map(|method| {
        let endpoint = &method.endpoint;
        let returns = type_label(&method.output);
        let params = method.params.iter().map(|param| {
            let name = param.ident.to_string();
            let ty = type_label(&param.ty);
            quote!(.param(#name, #ty))
        });
        let cancellable = method.cancellable.then(|| quote!(.cancellable()));
        quote! {
            ::courier_core::ShapeMember::Method(
                ::courier_core::MethodShape::new(#endpoint, #returns)
                    #(#params)*
                    #cancellable
            )
        }
    });
    let events = service.events.iter().map(|event| {
        let name = &event.name;
        let payload = type_label(&event.payload);
        quote! {
            ::courier_core::ShapeMember::Event(::courier_core::EventShape::new(#name, #payload))
        }
    });
    methods.chain(events).collect()
}

fn dispatch_arm(server_ident: &syn::Ident, method: &MethodDef) -> TokenStream {
    let ident = &method.ident;
    let endpoint = &method.endpoint;
    let arity = method.params.len();
    let locals: Vec<_> = (0..arity).map(|i| format_ident!("__arg{}", i)).collect();
    let types = method.params.iter().map(|p| &p.ty);

    let unpack = if arity == 0 {
        quote! {
            ::courier_core::dispatch::Arguments::new(#endpoint, 0, args)?;
        }
    } else {
        quote! {
            let mut __args = ::courier_core::dispatch::Arguments::new(#endpoint, #arity, args)?;
            #(let #locals: #types = __args.take()?;)*
        }
    };

    let reply = if method.fallible {
        quote! {
            match __reply {
                ::core::result::Result::Ok(__value) => {
                    ::courier_core::dispatch::encode_reply(#endpoint, &__value)
                }
                ::core::result::Result::Err(__err) => ::core::result::Result::Err(
                    ::courier_core::RpcError::server_failure(#endpoint, __err),
                ),
            }
        }
    } else {
        quote! {
            ::courier_core::dispatch::encode_reply(#endpoint, &__reply)
        }
    };

    quote! {
        #endpoint => {
            #unpack
            let __reply = <S as #server_ident>::#ident(&*self.server, ctx #(, #locals)*).await;
            #reply
        }
    }
}

fn event_arm(server_ident: &syn::Ident, event: &EventDef) -> TokenStream {
    let ident = &event.ident;
    let name = &event.name;
    quote! {
        #name => ::core::option::Option::Some(
            <S as #server_ident>::#ident(&*self.server) as &dyn ::courier_core::ErasedRpcEvent
        ),
    }
}

fn generate_dispatcher(service: &ServiceDef) -> TokenStream {
    let vis = &service.vis;
    let trait_ident = &service.trait_ident;
    let server_ident = format_ident!("{}Server", trait_ident);
    let dispatcher_ident = format_ident!("{}Dispatcher", trait_ident);
    let service_name = &service.name;
    let members = shape_members(service);
    let arms = service
        .methods
        .iter()
        .map(|method| dispatch_arm(&server_ident, method));
    let event_arms = service
        .events
        .iter()
        .map(|event| event_arm(&server_ident, event));
    let doc = format!("Dispatches remote calls into a [`{server_ident}`].");

    quote! {
        #[doc = #doc]
        #vis struct #dispatcher_ident<S: ?Sized> {
            server: ::std::sync::Arc<S>,
            shape: ::courier_core::ServerShape,
        }

        impl<S: #server_ident + ?Sized> #dispatcher_ident<S> {
            /// Wrap an owned server.
            pub fn new(server: S) -> Self
            where
                S: Sized,
            {
                Self::from_arc(::std::sync::Arc::new(server))
            }

            /// Wrap a shared server.
            pub fn from_arc(server: ::std::sync::Arc<S>) -> Self {
                Self {
                    server,
                    shape: Self::shape_descriptor(),
                }
            }

            /// Server shape of this service; identical on every call.
            pub fn shape_descriptor() -> ::courier_core::ServerShape {
                ::courier_core::ServerShape::prevalidated(
                    #service_name,
                    ::std::vec![#(#members),*],
                )
            }

            /// The wrapped server.
            pub fn server(&self) -> &::std::sync::Arc<S> {
                &self.server
            }

            /// Erase into the form transports and providers hold.
            pub fn into_rpc_server(self) -> ::std::sync::Arc<dyn ::courier_core::RpcServer> {
                ::std::sync::Arc::new(self)
            }
        }

        impl<S: ?Sized> ::core::fmt::Debug for #dispatcher_ident<S> {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.debug_struct(::core::stringify!(#dispatcher_ident))
                    .field("shape", &self.shape)
                    .finish_non_exhaustive()
            }
        }

        #[::courier_core::async_trait]
        impl<S: #server_ident + ?Sized> ::courier_core::RpcServer for #dispatcher_ident<S> {
            fn shape(&self) -> &::courier_core::ServerShape {
                &self.shape
            }

            #[allow(unused_variables, unreachable_code)]
            async fn call(
                &self,
                ctx: &::courier_core::RpcContext,
                method: &str,
                args: ::std::vec::Vec<::courier_core::serde_json::Value>,
            ) -> ::courier_core::Result<::courier_core::serde_json::Value> {
                match method {
                    #(#arms)*
                    _ => ::core::result::Result::Err(
                        ::courier_core::RpcError::unknown_method(#service_name, method),
                    ),
                }
            }

            #[allow(unused_variables)]
            fn event(&self, name: &str) -> ::core::option::Option<&dyn ::courier_core::ErasedRpcEvent> {
                match name {
                    #(#event_arms)*
                    _ => ::core::option::Option::None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::{parse_service, ServiceArgs};
    use quote::quote;
    use syn::ItemTrait;

    fn expand(tokens: TokenStream) -> String {
        let mut item: ItemTrait = syn::parse2(tokens).unwrap();
        let service = parse_service(ServiceArgs::default(), &mut item).unwrap();
        generate(&service).to_string()
    }

    #[test]
    fn test_generates_server_and_dispatcher() {
        let output = expand(quote! {
            pub trait Greeter {
                fn greet(&self, name: String) -> String;
                fn on_greeted(&self) -> RpcEvent<String>;
            }
        });

        assert!(output.contains("trait GreeterServer"));
        assert!(output.contains("struct GreeterDispatcher"));
        assert!(output.contains("\"$greet\""));
        assert!(output.contains("\"on_greeted\""));
    }

    #[test]
    fn test_cancellable_methods_are_marked_in_shape() {
        let output = expand(quote! {
            trait Search {
                async fn find(&self, query: String, token: CancellationToken) -> Vec<String>;
            }
        });

        assert!(output.contains("cancellable"));
        assert!(!output.contains("CancellationToken"));
    }
}

//! Parsing of service traits into server contract definitions.

use proc_macro2::{Span, TokenStream};
use quote::{format_ident, ToTokens};
use syn::ext::IdentExt;
use syn::{
    parse_quote, Attribute, FnArg, GenericArgument, Ident, ItemTrait, LitStr, Pat, PathArguments,
    Result, ReturnType, Signature, TraitItem, TraitItemFn, Type, TypeParamBound, Visibility,
};

/// Reserved prefix for remotely dispatchable endpoints.
pub const RESERVED_PREFIX: &str = "$";

/// Name reserved for the injected call context.
const CONTEXT_PARAM: &str = "ctx";

/// A service trait with its remotable members.
pub struct ServiceDef {
    pub name: String,
    pub vis: Visibility,
    pub trait_ident: Ident,
    pub methods: Vec<MethodDef>,
    pub events: Vec<EventDef>,
}

pub struct MethodDef {
    pub ident: Ident,
    pub endpoint: String,
    pub docs: Vec<Attribute>,
    pub params: Vec<ParamDef>,
    pub output: Type,
    pub fallible: bool,
    pub cancellable: bool,
}

pub struct ParamDef {
    pub ident: Ident,
    pub ty: Type,
}

pub struct EventDef {
    pub ident: Ident,
    pub name: String,
    pub docs: Vec<Attribute>,
    pub payload: Type,
}

#[derive(Default)]
struct MemberArgs {
    rename: Option<LitStr>,
    skip: bool,
}

/// Arguments of `#[rpc_service(...)]`.
#[derive(Default)]
pub struct ServiceArgs {
    pub name: Option<LitStr>,
}

impl ServiceArgs {
    pub fn parse(attr: TokenStream) -> Result<Self> {
        let mut args = ServiceArgs::default();
        let parser = syn::meta::parser(|meta| {
            if meta.path.is_ident("name") {
                args.name = Some(meta.value()?.parse()?);
                Ok(())
            } else {
                Err(meta.error("unsupported rpc_service argument, expected `name = \"...\"`"))
            }
        });
        syn::parse::Parser::parse2(parser, attr)?;
        Ok(args)
    }
}

/// Parse a service trait, stripping `#[rpc(...)]` helper attributes from it.
pub fn parse_service(args: ServiceArgs, item: &mut ItemTrait) -> Result<ServiceDef> {
    let trait_ident = item.ident.clone();
    let name = args
        .name
        .map(|lit| lit.value())
        .unwrap_or_else(|| trait_ident.unraw().to_string());

    if !item.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &item.generics,
            "rpc_service traits cannot be generic",
        ));
    }

    let mut methods = Vec::new();
    let mut events = Vec::new();
    let mut names: Vec<(String, Span)> = Vec::new();

    for trait_item in &mut item.items {
        let TraitItem::Fn(func) = trait_item else {
            continue;
        };
        let member_args = take_member_args(&mut func.attrs)?;
        if member_args.skip || func.sig.receiver().is_none() {
            continue;
        }
        check_receiver(func)?;

        let span = func.sig.ident.span();
        if let Some(payload) = event_payload(&func.sig) {
            let event = parse_event(func, member_args.rename, payload)?;
            claim_name(&mut names, &event.name, span)?;
            events.push(event);
        } else {
            let method = parse_method(func, member_args.rename)?;
            claim_name(&mut names, &method.endpoint, span)?;
            methods.push(method);
        }
    }

    Ok(ServiceDef {
        name,
        vis: item.vis.clone(),
        trait_ident,
        methods,
        events,
    })
}

/// Apply the reserved-prefix rule; idempotent.
pub fn endpoint_name(raw: &str) -> String {
    if raw.starts_with(RESERVED_PREFIX) {
        raw.to_string()
    } else {
        format!("{RESERVED_PREFIX}{raw}")
    }
}

/// Compact rendering of a type for server shapes.
///
/// Spacing is kept only where it separates two words, as in
/// `dyn Error` or `'static str`.
pub fn type_label(ty: &Type) -> String {
    let rendered = ty.to_token_stream().to_string();
    let mut label = String::with_capacity(rendered.len());
    let mut chars = rendered.chars().peekable();
    while let Some(c) = chars.next() {
        if c != ' ' {
            label.push(c);
            continue;
        }
        let after_word = label.chars().last().is_some_and(is_word_char);
        let before_word = chars.peek().copied().is_some_and(is_word_char);
        if after_word && before_word {
            label.push(' ');
        }
    }
    label
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn take_member_args(attrs: &mut Vec<Attribute>) -> Result<MemberArgs> {
    let mut args = MemberArgs::default();
    let mut error: Option<syn::Error> = None;
    attrs.retain(|attr| {
        if !attr.path().is_ident("rpc") {
            return true;
        }
        let parsed = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") {
                args.rename = Some(meta.value()?.parse()?);
                Ok(())
            } else if meta.path.is_ident("skip") {
                args.skip = true;
                Ok(())
            } else {
                Err(meta.error("unsupported rpc attribute, expected `rename = \"...\"` or `skip`"))
            }
        });
        if let Err(err) = parsed {
            match error.as_mut() {
                Some(existing) => existing.combine(err),
                None => error = Some(err),
            }
        }
        false
    });
    match error {
        Some(err) => Err(err),
        None => Ok(args),
    }
}

fn check_receiver(func: &TraitItemFn) -> Result<()> {
    let Some(receiver) = func.sig.receiver() else {
        return Ok(());
    };
    if receiver.reference.is_none() || receiver.mutability.is_some() {
        return Err(syn::Error::new_spanned(
            receiver,
            "remotable members must take `&self`; use #[rpc(skip)] to keep this method local",
        ));
    }
    if !func.sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &func.sig.generics,
            "generic methods cannot be dispatched remotely; use #[rpc(skip)] to keep this method local",
        ));
    }
    Ok(())
}

fn claim_name(names: &mut Vec<(String, Span)>, name: &str, span: Span) -> Result<()> {
    if let Some((_, first)) = names.iter().find(|(existing, _)| existing == name) {
        let mut err = syn::Error::new(
            span,
            format!("server member `{name}` collides with another member after prefixing"),
        );
        err.combine(syn::Error::new(*first, format!("`{name}` first declared here")));
        return Err(err);
    }
    names.push((name.to_string(), span));
    Ok(())
}

fn parse_method(func: &TraitItemFn, rename: Option<LitStr>) -> Result<MethodDef> {
    let sig = &func.sig;
    let raw = rename
        .map(|lit| lit.value())
        .unwrap_or_else(|| sig.ident.unraw().to_string());

    let mut params = Vec::new();
    for (index, input) in sig.inputs.iter().enumerate() {
        let FnArg::Typed(pat_type) = input else {
            continue;
        };
        let ident = match &*pat_type.pat {
            Pat::Ident(pat) => pat.ident.clone(),
            _ => format_ident!("arg{}", index),
        };
        if ident == CONTEXT_PARAM {
            return Err(syn::Error::new_spanned(
                &pat_type.pat,
                "parameter name `ctx` is reserved for the call context",
            ));
        }
        params.push(ParamDef {
            ident,
            ty: (*pat_type.ty).clone(),
        });
    }

    let cancellable = params
        .last()
        .is_some_and(|param| is_cancellation(&param.ty));
    if cancellable {
        params.pop();
    }
    for param in &params {
        if is_cancellation(&param.ty) {
            return Err(syn::Error::new_spanned(
                &param.ty,
                "a CancellationToken parameter must be the last parameter",
            ));
        }
        if let Type::Reference(_) = param.ty {
            return Err(syn::Error::new_spanned(
                &param.ty,
                "remotable parameters must be owned types",
            ));
        }
    }

    let output = awaited_output(sig);
    let fallible = is_result(&output);

    Ok(MethodDef {
        ident: sig.ident.clone(),
        endpoint: endpoint_name(&raw),
        docs: doc_attrs(&func.attrs),
        params,
        output,
        fallible,
        cancellable,
    })
}

fn parse_event(func: &TraitItemFn, rename: Option<LitStr>, payload: Type) -> Result<EventDef> {
    let sig = &func.sig;
    if sig.asyncness.is_some() {
        return Err(syn::Error::new_spanned(
            sig.asyncness,
            "event members cannot be async",
        ));
    }
    if sig.inputs.len() != 1 {
        return Err(syn::Error::new_spanned(
            &sig.inputs,
            "event members take no parameters besides `&self`",
        ));
    }
    let (name, span) = match rename {
        Some(lit) => (lit.value(), lit.span()),
        None => (sig.ident.unraw().to_string(), sig.ident.span()),
    };
    if name.starts_with(RESERVED_PREFIX) {
        return Err(syn::Error::new(
            span,
            format!("event member `{name}` must not use the reserved prefix `{RESERVED_PREFIX}`"),
        ));
    }
    Ok(EventDef {
        ident: sig.ident.clone(),
        name,
        docs: doc_attrs(&func.attrs),
        payload,
    })
}

fn doc_attrs(attrs: &[Attribute]) -> Vec<Attribute> {
    attrs
        .iter()
        .filter(|attr| attr.path().is_ident("doc"))
        .cloned()
        .collect()
}

fn last_segment(ty: &Type) -> Option<&syn::PathSegment> {
    match ty {
        Type::Path(type_path) if type_path.qself.is_none() => type_path.path.segments.last(),
        Type::Paren(paren) => last_segment(&paren.elem),
        Type::Group(group) => last_segment(&group.elem),
        _ => None,
    }
}

fn type_args(segment: &syn::PathSegment) -> impl Iterator<Item = &Type> {
    let args = match &segment.arguments {
        PathArguments::AngleBracketed(args) => Some(&args.args),
        _ => None,
    };
    args.into_iter().flatten().filter_map(|arg| match arg {
        GenericArgument::Type(ty) => Some(ty),
        _ => None,
    })
}

fn is_cancellation(ty: &Type) -> bool {
    last_segment(ty).is_some_and(|segment| segment.ident == "CancellationToken")
}

fn is_result(ty: &Type) -> bool {
    last_segment(ty).is_some_and(|segment| segment.ident == "Result")
}

/// Payload type if the member's declared type is `RpcEvent<U>` or `&RpcEvent<U>`.
fn event_payload(sig: &Signature) -> Option<Type> {
    let ReturnType::Type(_, ty) = &sig.output else {
        return None;
    };
    let ty = match &**ty {
        Type::Reference(reference) => &*reference.elem,
        other => other,
    };
    let segment = last_segment(ty)?;
    if segment.ident != "RpcEvent" {
        return None;
    }
    let mut args = type_args(segment);
    let payload = args.next()?.clone();
    args.next().is_none().then_some(payload)
}

/// Result type of the member once awaited.
fn awaited_output(sig: &Signature) -> Type {
    let ty: Type = match &sig.output {
        ReturnType::Default => parse_quote!(()),
        ReturnType::Type(_, ty) => (**ty).clone(),
    };
    if sig.asyncness.is_some() {
        return ty;
    }
    future_output(&ty).unwrap_or(ty)
}

fn future_output(ty: &Type) -> Option<Type> {
    match ty {
        Type::ImplTrait(impl_trait) => bounds_output(impl_trait.bounds.iter()),
        Type::TraitObject(object) => bounds_output(object.bounds.iter()),
        Type::Paren(paren) => future_output(&paren.elem),
        Type::Group(group) => future_output(&group.elem),
        Type::Path(_) => {
            let segment = last_segment(ty)?;
            match segment.ident.to_string().as_str() {
                "BoxFuture" | "LocalBoxFuture" => type_args(segment).last().cloned(),
                "Pin" | "Box" => type_args(segment).next().and_then(future_output),
                _ => None,
            }
        }
        _ => None,
    }
}

fn bounds_output<'a>(mut bounds: impl Iterator<Item = &'a TypeParamBound>) -> Option<Type> {
    bounds.find_map(|bound| {
        let TypeParamBound::Trait(trait_bound) = bound else {
            return None;
        };
        let segment = trait_bound.path.segments.last()?;
        if segment.ident != "Future" {
            return None;
        }
        let PathArguments::AngleBracketed(args) = &segment.arguments else {
            return None;
        };
        args.args.iter().find_map(|arg| match arg {
            GenericArgument::AssocType(assoc) if assoc.ident == "Output" => Some(assoc.ty.clone()),
            _ => None,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quote::quote;

    fn parse(tokens: TokenStream) -> Result<ServiceDef> {
        let mut item: ItemTrait = syn::parse2(tokens)?;
        parse_service(ServiceArgs::default(), &mut item)
    }

    #[test]
    fn test_methods_are_prefixed_and_events_kept() {
        let service = parse(quote! {
            pub trait Files {
                fn read(&self, path: String) -> Vec<u8>;
                #[rpc(rename = "$stat")]
                fn metadata(&self, path: String) -> u64;
                fn on_changed(&self) -> RpcEvent<String>;
                fn local_only() -> u8;
                const LIMIT: usize;
            }
        })
        .unwrap();

        let endpoints: Vec<_> = service.methods.iter().map(|m| m.endpoint.as_str()).collect();
        assert_eq!(endpoints, ["$read", "$stat"]);
        assert_eq!(service.events.len(), 1);
        assert_eq!(service.events[0].name, "on_changed");
        assert_eq!(type_label(&service.events[0].payload), "String");
    }

    #[test]
    fn test_trailing_cancellation_is_dropped() {
        let service = parse(quote! {
            trait Search {
                async fn find(&self, query: String, token: CancellationToken) -> Vec<String>;
            }
        })
        .unwrap();

        let find = &service.methods[0];
        assert!(find.cancellable);
        assert_eq!(find.params.len(), 1);
        assert_eq!(find.params[0].ident, "query");
        assert_eq!(type_label(&find.output), "Vec<String>");
    }

    #[test]
    fn test_awaitable_results_are_unwrapped() {
        let service = parse(quote! {
            trait Clock {
                fn now(&self) -> impl Future<Output = u64> + Send;
                fn boxed(&self) -> Pin<Box<dyn Future<Output = Result<u64, String>> + Send>>;
                fn plain(&self);
            }
        })
        .unwrap();

        let outputs: Vec<_> = service.methods.iter().map(|m| type_label(&m.output)).collect();
        assert_eq!(outputs, ["u64", "Result<u64,String>", "()"]);
        assert!(service.methods[1].fallible);
        assert!(!service.methods[0].fallible);
    }

    #[test]
    fn test_type_label_keeps_word_separators() {
        let label = |tokens: TokenStream| type_label(&syn::parse2(tokens).unwrap());

        assert_eq!(label(quote!(Box<dyn Error>)), "Box<dyn Error>");
        assert_eq!(label(quote!(&'static str)), "&'static str");
        assert_eq!(label(quote!(Box<dyn Error + Send>)), "Box<dyn Error+Send>");
        assert_eq!(label(quote!(HashMap<String, Vec<u8> >)), "HashMap<String,Vec<u8>>");
        assert_eq!(label(quote!(())), "()");
    }

    #[test]
    fn test_collision_after_prefixing_is_rejected() {
        let result = parse(quote! {
            trait Files {
                fn open(&self);
                #[rpc(rename = "$open")]
                fn open_again(&self);
            }
        });
        let err = result.err().expect("collision must be rejected");
        assert!(err.to_string().contains("$open"));
    }

    #[test]
    fn test_prefixed_event_is_rejected() {
        let result = parse(quote! {
            trait Files {
                #[rpc(rename = "$changed")]
                fn changed(&self) -> RpcEvent<u32>;
            }
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_mut_receiver_is_rejected() {
        let result = parse(quote! {
            trait Counter {
                fn bump(&mut self) -> u64;
            }
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_skipped_methods_are_not_remotable() {
        let mut item: ItemTrait = syn::parse2(quote! {
            trait Counter {
                #[rpc(skip)]
                fn reset(&mut self);
                fn get(&self) -> u64;
            }
        })
        .unwrap();
        let service = parse_service(ServiceArgs::default(), &mut item).unwrap();

        assert_eq!(service.methods.len(), 1);
        let stripped = item.to_token_stream().to_string();
        assert!(!stripped.contains("rpc"));
    }

    #[test]
    fn test_service_name_argument() {
        let args = ServiceArgs::parse(quote!(name = "shell.items")).unwrap();
        let mut item: ItemTrait = syn::parse2(quote!(trait Items {})).unwrap();
        let service = parse_service(args, &mut item).unwrap();
        assert_eq!(service.name, "shell.items");
    }

    #[test]
    fn test_endpoint_name_is_idempotent() {
        assert_eq!(endpoint_name("open"), "$open");
        assert_eq!(endpoint_name(&endpoint_name("open")), "$open");
    }
}

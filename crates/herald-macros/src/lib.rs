// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! This crate provides the procedural macros re-exported by `herald-core`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse_macro_input, Attribute, DeriveInput, Expr, FnArg, ImplItem, ImplItemFn, ItemImpl, Type,
};

/// A derive macro that implements the `herald_core::Subscriber` trait.
///
/// The generated implementation keeps the default liveness check: the
/// subscriber is alive for as long as it is reachable.
#[proc_macro_derive(Subscriber)]
pub fn derive_subscriber(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let expanded = quote! {
        impl #impl_generics ::herald_core::Subscriber for #name #ty_generics #where_clause {}
    };

    TokenStream::from(expanded)
}

/// Turns the annotated methods of an inherent `impl` block into the type's
/// `herald_core::EventHandlers` binding table.
///
/// Recognised method attributes, each taking optional `priority = <i32>` and
/// `once` arguments:
///
/// * `#[subscribe]` on `fn(&self, &E) -> HandlerResult`
/// * `#[subscribe_ref]` on `fn(&self, &mut E) -> HandlerResult`
/// * `#[respond]` on `fn(&self, &E) -> anyhow::Result<R>`
///
/// The attributes are removed from the emitted `impl` block.
#[proc_macro_attribute]
pub fn handlers(args: TokenStream, input: TokenStream) -> TokenStream {
    if !args.is_empty() {
        return syn::Error::new(
            proc_macro2::Span::call_site(),
            "#[handlers] does not take arguments",
        )
        .to_compile_error()
        .into();
    }
    let mut item = parse_macro_input!(input as ItemImpl);
    match expand_handlers(&mut item) {
        Ok(expanded) => expanded.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Subscribe,
    SubscribeRef,
    Respond,
}

impl Kind {
    fn from_attribute(attr: &Attribute) -> Option<Self> {
        let path = attr.path();
        if path.is_ident("subscribe") {
            Some(Kind::Subscribe)
        } else if path.is_ident("subscribe_ref") {
            Some(Kind::SubscribeRef)
        } else if path.is_ident("respond") {
            Some(Kind::Respond)
        } else {
            None
        }
    }
}

struct Binding {
    kind: Kind,
    method: syn::Ident,
    event: Type,
    priority: Option<Expr>,
    once: bool,
}

fn expand_handlers(item: &mut ItemImpl) -> syn::Result<TokenStream2> {
    if let Some((_, path, _)) = &item.trait_ {
        return Err(syn::Error::new_spanned(
            path,
            "#[handlers] must be placed on an inherent impl block",
        ));
    }

    let mut bindings = Vec::new();
    for impl_item in item.items.iter_mut() {
        if let ImplItem::Fn(method) = impl_item {
            if let Some(binding) = take_binding(method)? {
                bindings.push(binding);
            }
        }
    }

    let self_ty = &item.self_ty;
    let (impl_generics, _, where_clause) = item.generics.split_for_impl();
    let calls = bindings.iter().map(binding_call);

    Ok(quote! {
        #item

        impl #impl_generics ::herald_core::EventHandlers for #self_ty #where_clause {
            fn bind(table: &mut ::herald_core::BindingTable<Self>) {
                #(#calls)*
            }
        }
    })
}

/// Removes the binding attribute of `method`, if any, and describes it.
fn take_binding(method: &mut ImplItemFn) -> syn::Result<Option<Binding>> {
    let mut found: Option<(Kind, Attribute)> = None;
    let mut kept = Vec::with_capacity(method.attrs.len());
    for attr in method.attrs.drain(..) {
        match Kind::from_attribute(&attr) {
            Some(_) if found.is_some() => {
                return Err(syn::Error::new_spanned(
                    attr,
                    "a method can only be bound to one event",
                ));
            }
            Some(kind) => found = Some((kind, attr)),
            None => kept.push(attr),
        }
    }
    method.attrs = kept;

    let Some((kind, attr)) = found else {
        return Ok(None);
    };

    let mut priority = None;
    let mut once = false;
    if !matches!(attr.meta, syn::Meta::Path(_)) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("priority") {
                priority = Some(meta.value()?.parse::<Expr>()?);
                Ok(())
            } else if meta.path.is_ident("once") {
                once = true;
                Ok(())
            } else {
                Err(meta.error("expected `priority = <i32>` or `once`"))
            }
        })?;
    }

    let event = event_type(method, kind)?;
    Ok(Some(Binding {
        kind,
        method: method.sig.ident.clone(),
        event,
        priority,
        once,
    }))
}

/// Extracts `E` from the `&E` / `&mut E` parameter following the receiver.
fn event_type(method: &ImplItemFn, kind: Kind) -> syn::Result<Type> {
    let sig = &method.sig;
    let mut inputs = sig.inputs.iter();
    match inputs.next() {
        Some(FnArg::Receiver(receiver))
            if receiver.reference.is_some() && receiver.mutability.is_none() => {}
        _ => {
            return Err(syn::Error::new_spanned(
                &sig.ident,
                "event handlers must take `&self`",
            ))
        }
    }

    let (Some(FnArg::Typed(arg)), None) = (inputs.next(), inputs.next()) else {
        return Err(syn::Error::new_spanned(
            &sig.inputs,
            "event handlers take exactly one event parameter after `&self`",
        ));
    };

    match &*arg.ty {
        Type::Reference(reference) => {
            let wants_mut = kind == Kind::SubscribeRef;
            if reference.mutability.is_some() != wants_mut {
                let expected = if wants_mut { "&mut Event" } else { "&Event" };
                return Err(syn::Error::new_spanned(
                    &arg.ty,
                    format!("expected the event parameter to be `{expected}`"),
                ));
            }
            Ok((*reference.elem).clone())
        }
        other => Err(syn::Error::new_spanned(
            other,
            "the event parameter must be a reference",
        )),
    }
}

fn binding_call(binding: &Binding) -> TokenStream2 {
    let Binding {
        kind,
        method,
        event,
        priority,
        once,
    } = binding;
    let name = method.to_string();
    let priority = match priority {
        Some(expr) => quote! { #expr },
        None => quote! { 0 },
    };
    let options = quote! {
        ::herald_core::SubscribeOptions::new()
            .priority(#priority)
            .with_once(#once)
    };

    match kind {
        Kind::Subscribe => quote! {
            table.on::<#event>(#name, Self::#method, #options);
        },
        Kind::SubscribeRef => quote! {
            table.on_ref::<#event>(#name, Self::#method, #options);
        },
        Kind::Respond => quote! {
            table.on_request::<#event, _>(#name, Self::#method, #options);
        },
    }
}

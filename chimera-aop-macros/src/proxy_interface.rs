//! `#[proxy_interface]` 宏实现
//!
//! 为 trait 生成两部分：
//! - `impl ProxyInterface for dyn Trait`，提供接口元数据
//! - `impl Trait for AopProxy`，每个方法都转发到 `AopProxy::call`

use crate::utils::{self, ParamKind};
use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{Error, ItemTrait, Result, ReturnType, TraitItem};

pub fn impl_proxy_interface(item: ItemTrait) -> Result<TokenStream> {
    if !item.generics.params.is_empty() {
        return Err(Error::new_spanned(
            &item.generics,
            "#[proxy_interface] does not support generic traits",
        ));
    }

    let trait_ident = &item.ident;
    let interface_name = trait_ident.to_string();

    let mut declarations = Vec::new();
    let mut forwarders = Vec::new();

    for trait_item in &item.items {
        let TraitItem::Fn(method) = trait_item else {
            continue;
        };
        let sig = &method.sig;
        let method_name = sig.ident.to_string();

        match utils::receiver(&sig.inputs) {
            Some(receiver) if utils::is_shared_ref(receiver) => {}
            _ => {
                return Err(Error::new_spanned(
                    sig,
                    "methods of a #[proxy_interface] trait must take `&self`",
                ))
            }
        }
        if sig.asyncness.is_some() || !sig.generics.params.is_empty() {
            return Err(Error::new_spanned(
                sig,
                "methods of a #[proxy_interface] trait must be synchronous and non-generic",
            ));
        }

        let ok_type = match &sig.output {
            ReturnType::Type(_, ty) => utils::result_ok_type(ty),
            ReturnType::Default => None,
        }
        .ok_or_else(|| {
            Error::new_spanned(
                &sig.output,
                "methods of a #[proxy_interface] trait must return anyhow::Result<T>",
            )
        })?;

        let mut parameter_types = Vec::new();
        let mut params = Vec::new();
        let mut pushed = Vec::new();
        for (position, ty) in utils::typed_params(&sig.inputs).into_iter().enumerate() {
            let binding = format_ident!("__arg{}", position);
            let kind = ParamKind::classify(ty);
            if let Some(type_name) = kind.signature_type() {
                parameter_types.push(type_name);
            }
            match kind {
                ParamKind::Value(_) => pushed.push(quote! { .with(#binding) }),
                ParamKind::Ref(_) => {
                    pushed.push(quote! { .with(::core::clone::Clone::clone(#binding)) })
                }
                ParamKind::Str => {
                    pushed.push(quote! { .with(::std::string::ToString::to_string(#binding)) })
                }
                ParamKind::Context => {}
            }
            params.push(quote! { #binding: #ty });
        }

        declarations.push(quote! { .method(#method_name, &[#(#parameter_types),*]) });

        let ident = &sig.ident;
        let output = &sig.output;
        forwarders.push(quote! {
            #[allow(unused_variables)]
            fn #ident(&self #(, #params)*) #output {
                self.call::<#ok_type>(
                    #method_name,
                    ::chimera_aop::Arguments::new() #(#pushed)*,
                )
            }
        });
    }

    Ok(quote! {
        #item

        impl ::chimera_aop::ProxyInterface for dyn #trait_ident {
            fn interface() -> ::chimera_aop::__private::Arc<::chimera_aop::Interface> {
                static INTERFACE: ::chimera_aop::__private::Lazy<
                    ::chimera_aop::__private::Arc<::chimera_aop::Interface>,
                > = ::chimera_aop::__private::Lazy::new(|| {
                    ::chimera_aop::Interface::builder(#interface_name)
                        #(#declarations)*
                        .build()
                });
                INTERFACE.clone()
            }
        }

        impl #trait_ident for ::chimera_aop::AopProxy {
            #(#forwarders)*
        }
    })
}

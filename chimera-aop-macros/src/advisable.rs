//! `#[advisable]` 宏实现
//!
//! 为 impl 块生成方法调用器，并通过 inventory 提交一个 `MethodContribution`。
//! 固有 impl 只收集 `pub fn xxx(&self, ..)`，trait impl 收集全部 `&self` 方法并声明接口

use crate::utils::{self, ParamKind};
use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::meta::ParseNestedMeta;
use syn::{Error, ImplItem, ImplItemFn, ItemImpl, LitStr, Result, ReturnType, Type, Visibility};

#[derive(Default)]
pub struct AdvisableArgs {
    name: Option<String>,
    sealed: bool,
    infrastructure: bool,
}

impl AdvisableArgs {
    pub fn parse(&mut self, meta: ParseNestedMeta) -> Result<()> {
        if meta.path.is_ident("sealed") {
            self.sealed = true;
            Ok(())
        } else if meta.path.is_ident("infrastructure") {
            self.infrastructure = true;
            Ok(())
        } else if meta.path.is_ident("name") {
            let name: LitStr = meta.value()?.parse()?;
            self.name = Some(name.value());
            Ok(())
        } else {
            Err(meta.error("expected `sealed`, `infrastructure` or `name = \"...\"`"))
        }
    }
}

pub fn impl_advisable(args: AdvisableArgs, item: ItemImpl) -> Result<TokenStream> {
    if !item.generics.params.is_empty() {
        return Err(Error::new_spanned(
            &item.generics,
            "#[advisable] does not support generic impl blocks",
        ));
    }

    let self_ty = &*item.self_ty;
    let owner_name = owner_name(self_ty);
    let trait_path = item.trait_.as_ref().map(|(_, path, _)| path);

    let mut statements = Vec::new();
    if let Some(name) = &args.name {
        statements.push(quote! { template.named(#name); });
    }
    if args.sealed {
        statements.push(quote! { template.mark_sealed(); });
    }
    if args.infrastructure {
        statements.push(quote! { template.mark_infrastructure(); });
    }

    let declaring = match trait_path {
        Some(path) => {
            statements.push(quote! {
                template.add_interface(<dyn #path as ::chimera_aop::ProxyInterface>::interface());
            });
            let trait_name = path
                .segments
                .last()
                .map(|segment| segment.ident.to_string())
                .unwrap_or_default();
            quote! { ::core::option::Option::Some(#trait_name) }
        }
        None => quote! { ::core::option::Option::None },
    };

    for impl_item in &item.items {
        let ImplItem::Fn(method) = impl_item else {
            continue;
        };
        if trait_path.is_none() && !matches!(method.vis, Visibility::Public(_)) {
            continue;
        }
        let Some(receiver) = utils::receiver(&method.sig.inputs) else {
            continue;
        };
        if !utils::is_shared_ref(receiver) {
            if trait_path.is_some() {
                return Err(Error::new_spanned(
                    receiver,
                    "#[advisable] methods must take `&self`",
                ));
            }
            continue;
        }

        let invoker = method_invoker(self_ty, trait_path, method)?;
        let method_name = method.sig.ident.to_string();
        let parameter_types: Vec<String> = utils::typed_params(&method.sig.inputs)
            .into_iter()
            .filter_map(|ty| ParamKind::classify(ty).signature_type())
            .collect();

        statements.push(quote! {
            template.add_method::<#self_ty, _>(
                #declaring,
                #method_name,
                &[#(#parameter_types),*],
                #invoker,
            );
        });
    }

    Ok(quote! {
        #item

        const _: () = {
            fn __owner() -> ::chimera_aop::__private::TypeId {
                ::chimera_aop::__private::TypeId::of::<#self_ty>()
            }

            fn __owner_name() -> &'static str {
                #owner_name
            }

            #[allow(unused_variables)]
            fn __contribute(template: &mut ::chimera_aop::class::ClassTemplate) {
                #(#statements)*
            }

            ::chimera_aop::inventory::submit! {
                ::chimera_aop::class::MethodContribution::new(__owner, __owner_name, __contribute)
            }
        };
    })
}

fn owner_name(self_ty: &Type) -> String {
    match self_ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .map(|segment| segment.ident.to_string())
            .unwrap_or_else(|| utils::type_string(self_ty)),
        _ => utils::type_string(self_ty),
    }
}

/// 生成 `|target, call| -> anyhow::Result<ReturnValue>` 闭包
fn method_invoker(
    self_ty: &Type,
    trait_path: Option<&syn::Path>,
    method: &ImplItemFn,
) -> Result<TokenStream> {
    let sig = &method.sig;
    if let Some(asyncness) = &sig.asyncness {
        return Err(Error::new_spanned(
            asyncness,
            "#[advisable] does not support async methods",
        ));
    }
    if !sig.generics.params.is_empty() {
        return Err(Error::new_spanned(
            &sig.generics,
            "#[advisable] does not support generic methods",
        ));
    }

    let mut bindings = Vec::new();
    let mut passed = Vec::new();
    let mut index = 0usize;
    for (position, ty) in utils::typed_params(&sig.inputs).into_iter().enumerate() {
        let binding = format_ident!("__arg{}", position);
        let extract = match ParamKind::classify(ty) {
            ParamKind::Value(ty) => {
                let extract = quote! { __call.arg_cloned::<#ty>(#index)? };
                index += 1;
                extract
            }
            ParamKind::Ref(ty) => {
                let extract = quote! { __call.arg::<#ty>(#index)? };
                index += 1;
                extract
            }
            ParamKind::Str => {
                let extract = quote! { __call.arg::<::std::string::String>(#index)?.as_str() };
                index += 1;
                extract
            }
            ParamKind::Context => quote! { __call.proxy_context() },
        };
        bindings.push(quote! { let #binding = #extract; });
        passed.push(binding);
    }

    let ident = &sig.ident;
    let call = match trait_path {
        Some(path) => quote! { <#self_ty as #path>::#ident(__target #(, #passed)*) },
        None => quote! { __target.#ident(#(#passed),*) },
    };

    let body = match &sig.output {
        ReturnType::Default => quote! {
            #call;
            ::core::result::Result::Ok(::chimera_aop::ReturnValue::unit())
        },
        ReturnType::Type(_, ty) if utils::result_ok_type(ty).is_some() => quote! {
            let __result = #call?;
            ::core::result::Result::Ok(::chimera_aop::ReturnValue::new(__result))
        },
        ReturnType::Type(..) => quote! {
            ::core::result::Result::Ok(::chimera_aop::ReturnValue::new(#call))
        },
    };

    Ok(quote! {
        |__target: &#self_ty, __call: &::chimera_aop::TargetCall<'_>|
            -> ::chimera_aop::__private::anyhow::Result<::chimera_aop::ReturnValue> {
            #(#bindings)*
            #body
        }
    })
}

//! `#[aspect]` 宏实现

use proc_macro2::TokenStream;
use quote::quote;
use syn::meta::ParseNestedMeta;
use syn::parse::{Parse, ParseStream};
use syn::{parse_quote, Error, ImplItem, ItemImpl, LitInt, LitStr, Result, Token, Type};

/// `#[aspect("execution(..)", order = 10)]` 的参数
pub struct AspectArgs {
    pointcut: LitStr,
    order: Option<LitInt>,
}

impl Parse for AspectArgs {
    fn parse(input: ParseStream) -> Result<Self> {
        let pointcut: LitStr = input.parse()?;
        let mut order = None;
        if input.parse::<Option<Token![,]>>()?.is_some() && !input.is_empty() {
            let parser = syn::meta::parser(|meta: ParseNestedMeta| {
                if meta.path.is_ident("order") {
                    order = Some(meta.value()?.parse()?);
                    Ok(())
                } else {
                    Err(meta.error("expected `order = <i32>`"))
                }
            });
            syn::parse::Parser::parse2(parser, input.parse::<TokenStream>()?)?;
        }
        Ok(Self { pointcut, order })
    }
}

/// 补全 `impl Aspect for X` 中的 `name`、`pointcut` 和 `order`，并注册到 inventory
///
/// 切面实例通过 `Default` 创建
pub fn impl_aspect(args: AspectArgs, mut item: ItemImpl) -> Result<TokenStream> {
    let implements_aspect = item
        .trait_
        .as_ref()
        .and_then(|(_, path, _)| path.segments.last())
        .map(|segment| segment.ident == "Aspect")
        .unwrap_or(false);
    if !implements_aspect {
        return Err(Error::new_spanned(
            &item.self_ty,
            "#[aspect] must be placed on an `impl Aspect for ...` block",
        ));
    }

    let self_ty = item.self_ty.clone();
    let name = aspect_name(&self_ty);
    let pointcut_expr = &args.pointcut;
    let defined = |wanted: &str| {
        item.items
            .iter()
            .any(|i| matches!(i, ImplItem::Fn(f) if f.sig.ident == wanted))
    };

    let mut generated: Vec<ImplItem> = Vec::new();
    if !defined("name") {
        generated.push(parse_quote! {
            fn name(&self) -> &str {
                #name
            }
        });
    }
    if !defined("pointcut") {
        generated.push(parse_quote! {
            fn pointcut(&self) -> &::chimera_aop::PointcutExpression {
                static POINTCUT: ::chimera_aop::__private::Lazy<::chimera_aop::PointcutExpression> =
                    ::chimera_aop::__private::Lazy::new(|| {
                        ::chimera_aop::PointcutExpression::execution(#pointcut_expr)
                    });
                &POINTCUT
            }
        });
    }
    if let Some(order) = &args.order {
        if defined("order") {
            return Err(Error::new_spanned(
                order,
                "`order` is given both in #[aspect] and as a method",
            ));
        }
        generated.push(parse_quote! {
            fn order(&self) -> i32 {
                #order
            }
        });
    }
    item.items.extend(generated);

    Ok(quote! {
        #item

        ::chimera_aop::inventory::submit! {
            ::chimera_aop::AspectRegistration::new(
                #name,
                #pointcut_expr,
                || ::chimera_aop::__private::Arc::new(
                    <#self_ty as ::core::default::Default>::default()
                ) as ::chimera_aop::__private::Arc<dyn ::chimera_aop::Aspect>
            )
        }
    })
}

fn aspect_name(self_ty: &Type) -> String {
    match self_ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .map(|segment| segment.ident.to_string())
            .unwrap_or_default(),
        _ => quote!(#self_ty).to_string(),
    }
}

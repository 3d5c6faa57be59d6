//! Chimera AOP 过程宏
//!
//! - `#[advisable]` - 为 impl 块生成方法调用器，注册为可代理的目标类
//! - `#[proxy_interface]` - 把 trait 声明为代理接口，并让 `AopProxy` 实现它
//! - `#[aspect]` - 补全切面实现并自动注册

extern crate proc_macro;

use proc_macro::TokenStream;
use syn::{parse_macro_input, ItemImpl, ItemTrait};

mod advisable;
mod aspect;
mod proxy_interface;
mod utils;

/// `#[advisable]` 宏
///
/// 放在固有 impl 上时收集所有 `pub fn (&self, ..)`；放在 trait impl 上时收集
/// trait 的全部方法，并声明该类实现了对应接口（trait 需要标注 `#[proxy_interface]`）。
///
/// 参数按值、`&T` 或 `&str` 传入；类型为 `CurrentProxy` 的参数由代理注入。
/// 返回 `Result` 的方法，其错误原样交给调用方。
///
/// 可选参数：`sealed`、`infrastructure`、`name = "..."`
///
/// ```ignore
/// #[advisable]
/// impl OrderService for OrderServiceImpl {
///     fn place(&self, item: String, quantity: u32) -> anyhow::Result<u64> {
///         // ...
///     }
/// }
///
/// #[advisable(sealed)]
/// impl OrderServiceImpl {
///     pub fn pending(&self) -> usize {
///         // ...
///     }
/// }
/// ```
#[proc_macro_attribute]
pub fn advisable(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut args = advisable::AdvisableArgs::default();
    let parser = syn::meta::parser(|meta| args.parse(meta));
    parse_macro_input!(attr with parser);

    let item = parse_macro_input!(item as ItemImpl);
    advisable::impl_advisable(args, item)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

/// `#[proxy_interface]` 宏
///
/// trait 的方法必须是 `&self` 方法并返回 `anyhow::Result<T>`
///
/// ```ignore
/// #[proxy_interface]
/// pub trait OrderService: Send + Sync {
///     fn place(&self, item: String, quantity: u32) -> anyhow::Result<u64>;
/// }
///
/// let service: Arc<dyn OrderService> = proxy_factory.get_proxy()?;
/// ```
#[proc_macro_attribute]
pub fn proxy_interface(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return syn::Error::new(
            proc_macro2::Span::call_site(),
            "#[proxy_interface] takes no arguments",
        )
        .to_compile_error()
        .into();
    }

    let item = parse_macro_input!(item as ItemTrait);
    proxy_interface::impl_proxy_interface(item)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

/// `#[aspect]` 宏
///
/// 放在 `impl Aspect for X` 上，补全 `name`、`pointcut`（以及可选的 `order`），
/// 并把切面提交到 inventory，`AdvisorRegistry::load_registered_aspects` 会自动加载它。
/// 切面类型需要实现 `Default`。
///
/// ```ignore
/// #[derive(Default)]
/// pub struct AuditAspect;
///
/// #[aspect("execution(* OrderService.*(..))", order = 10)]
/// impl Aspect for AuditAspect {
///     fn before(&self, join_point: &JoinPoint<'_>) {
///         tracing::info!("→ {}", join_point.signature());
///     }
/// }
/// ```
#[proc_macro_attribute]
pub fn aspect(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as aspect::AspectArgs);
    let item = parse_macro_input!(item as ItemImpl);
    aspect::impl_aspect(args, item)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

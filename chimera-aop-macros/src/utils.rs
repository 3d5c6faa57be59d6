//! 工具函数

use syn::{FnArg, GenericArgument, PathArguments, Receiver, Type};

/// 参数在 `Arguments` 中的存放方式
pub enum ParamKind {
    /// 按值传递，调用时克隆
    Value(Type),
    /// `&T`，实参按 `T` 存放
    Ref(Type),
    /// `&str`，实参按 `String` 存放
    Str,
    /// `CurrentProxy`，由代理在调用时注入，不占实参位置
    Context,
}

impl ParamKind {
    pub fn classify(ty: &Type) -> Self {
        match ty {
            Type::Reference(reference) if reference.mutability.is_none() => {
                if is_str(&reference.elem) {
                    ParamKind::Str
                } else {
                    ParamKind::Ref((*reference.elem).clone())
                }
            }
            _ if last_segment_is(ty, "CurrentProxy") => ParamKind::Context,
            _ => ParamKind::Value(ty.clone()),
        }
    }

    /// 签名中记录的参数类型名，`None` 表示不计入签名
    pub fn signature_type(&self) -> Option<String> {
        match self {
            ParamKind::Value(ty) | ParamKind::Ref(ty) => Some(type_string(ty)),
            ParamKind::Str => Some("String".to_string()),
            ParamKind::Context => None,
        }
    }
}

fn is_str(ty: &Type) -> bool {
    matches!(ty, Type::Path(path) if path.qself.is_none() && path.path.is_ident("str"))
}

pub fn type_string(ty: &Type) -> String {
    quote::quote!(#ty)
        .to_string()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// 类型路径最后一段是否为 `name`
pub fn last_segment_is(ty: &Type, name: &str) -> bool {
    match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .map(|segment| segment.ident == name)
            .unwrap_or(false),
        _ => false,
    }
}

/// `Result<T, ..>` 中的 `T`
pub fn result_ok_type(ty: &Type) -> Option<&Type> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident != "Result" {
        return None;
    }
    let PathArguments::AngleBracketed(arguments) = &segment.arguments else {
        return None;
    };
    arguments.args.iter().find_map(|argument| match argument {
        GenericArgument::Type(ty) => Some(ty),
        _ => None,
    })
}

/// 方法的接收者
pub fn receiver<'a>(inputs: impl IntoIterator<Item = &'a FnArg>) -> Option<&'a Receiver> {
    inputs.into_iter().find_map(|arg| match arg {
        FnArg::Receiver(receiver) => Some(receiver),
        FnArg::Typed(_) => None,
    })
}

/// 是否为 `&self`
pub fn is_shared_ref(receiver: &Receiver) -> bool {
    receiver.reference.is_some() && receiver.mutability.is_none()
}

/// 除接收者外的参数类型
pub fn typed_params<'a>(inputs: impl IntoIterator<Item = &'a FnArg>) -> Vec<&'a Type> {
    inputs
        .into_iter()
        .filter_map(|arg| match arg {
            FnArg::Typed(pat_type) => Some(&*pat_type.ty),
            FnArg::Receiver(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_classify_params() {
        assert!(matches!(ParamKind::classify(&parse_quote!(&str)), ParamKind::Str));
        assert!(matches!(ParamKind::classify(&parse_quote!(&Order)), ParamKind::Ref(_)));
        assert!(matches!(
            ParamKind::classify(&parse_quote!(chimera_aop::CurrentProxy)),
            ParamKind::Context
        ));
        assert!(matches!(ParamKind::classify(&parse_quote!(u64)), ParamKind::Value(_)));
    }

    #[test]
    fn test_signature_types() {
        let vec: Type = parse_quote!(Vec<String>);
        assert_eq!(ParamKind::classify(&vec).signature_type().as_deref(), Some("Vec<String>"));
        assert_eq!(ParamKind::Str.signature_type().as_deref(), Some("String"));
        assert!(ParamKind::Context.signature_type().is_none());
    }

    #[test]
    fn test_result_ok_type() {
        let ty: Type = parse_quote!(anyhow::Result<u64>);
        let ok = result_ok_type(&ty).unwrap();
        assert_eq!(type_string(ok), "u64");

        let plain: Type = parse_quote!(Option<u64>);
        assert!(result_ok_type(&plain).is_none());
    }
}

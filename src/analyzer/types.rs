use std::fmt::Display;

/// Canonical semantic type representation used by the analyzer and both
/// execution backends.
///
/// The assignment lattice: `any` is the top, `{ ? }` is the top of the
/// object sub-lattice, `never` is the bottom (a diverging expression) and
/// `unknown` is the poison type produced after a reported error; it is
/// compatible with everything so one mistake does not cascade.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Type {
    Unknown,
    Never,
    Any,
    Null,
    Int,
    Float,
    Bool,
    String,
    Range,
    List(Box<Type>),
    Object(Vec<ObjectField>),
    AnyObject,
    Option(Box<Type>),
    Function(Box<FunctionType>),
    /// A named singleton; its underlying value type lives in the
    /// module's singleton table.
    Singleton(String),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ObjectField {
    pub name: String,
    pub type_id: Type,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Params {
    Normal(Vec<(String, Type)>),
    /// Variadic tail: any number of arguments, each compatible with the
    /// element type.
    VarArgs(Type),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionType {
    pub params: Params,
    pub return_type: Type,
}

impl FunctionType {
    pub fn new(params: Vec<(String, Type)>, return_type: Type) -> Self {
        Self {
            params: Params::Normal(params),
            return_type,
        }
    }

    pub fn var_args(arg: Type, return_type: Type) -> Self {
        Self {
            params: Params::VarArgs(arg),
            return_type,
        }
    }
}

impl Type {
    pub fn function(params: Vec<(String, Type)>, return_type: Type) -> Type {
        Type::Function(Box::new(FunctionType::new(params, return_type)))
    }

    /// Whether a value of type `other` can be used where `self` is
    /// expected, without a cast.
    pub fn accepts(&self, other: &Type) -> bool {
        match (self, other) {
            // error poison and diverging expressions fit everywhere
            (Type::Unknown, _) | (_, Type::Unknown) => true,
            (_, Type::Never) => true,
            // `any` accepts everything; the reverse requires `as`
            (Type::Any, _) => true,
            (Type::Null, Type::Null) => true,
            (Type::Int, Type::Int) => true,
            (Type::Float, Type::Float) => true,
            (Type::Bool, Type::Bool) => true,
            (Type::String, Type::String) => true,
            (Type::Range, Type::Range) => true,
            // `{ ? }` is the top of the object sub-lattice
            (Type::AnyObject, Type::AnyObject) => true,
            (Type::AnyObject, Type::Object(_)) => true,
            (Type::List(l), Type::List(r)) => l.accepts(r),
            (Type::Object(l), Type::Object(r)) => {
                l.len() == r.len()
                    && l.iter().all(|lf| {
                        r.iter()
                            .any(|rf| lf.name == rf.name && lf.type_id.accepts(&rf.type_id))
                    })
            }
            (Type::Option(l), Type::Option(r)) => l.accepts(r),
            (Type::Function(l), Type::Function(r)) => {
                let params_ok = match (&l.params, &r.params) {
                    (Params::Normal(lp), Params::Normal(rp)) => {
                        lp.len() == rp.len()
                            && lp
                                .iter()
                                .zip(rp.iter())
                                .all(|((_, lt), (_, rt))| lt.accepts(rt))
                    }
                    (Params::VarArgs(lt), Params::VarArgs(rt)) => lt.accepts(rt),
                    _ => false,
                };
                params_ok && l.return_type.accepts(&r.return_type)
            }
            (Type::Singleton(l), Type::Singleton(r)) => l == r,
            _ => false,
        }
    }

    /// The common type of two branches (if/else, match arms, try/catch).
    /// `None` means the branches are incompatible.
    pub fn join(&self, other: &Type) -> Option<Type> {
        if matches!(self, Type::Never) {
            return Some(other.clone());
        }
        if matches!(other, Type::Never) {
            return Some(self.clone());
        }
        if self.accepts(other) {
            return Some(self.clone());
        }
        if other.accepts(self) {
            return Some(other.clone());
        }
        None
    }

    /// Whether `self as target` is a legal cast. Deep casts convert
    /// recursively; structural incompatibilities fail at runtime with a
    /// `CastError`.
    pub fn castable_to(&self, target: &Type) -> bool {
        if self.accepts(target) || target.accepts(self) {
            return true;
        }
        match (self, target) {
            (Type::Unknown, _) | (_, Type::Unknown) => true,
            // scalar coercions: bool <-> 0/1, int <-> float (lossy)
            (Type::Int | Type::Float | Type::Bool, Type::Int | Type::Float | Type::Bool) => true,
            // erasure views in both directions
            (Type::Object(_), Type::AnyObject) | (Type::AnyObject, Type::Object(_)) => true,
            (Type::Any, _) | (_, Type::Any) => true,
            (Type::List(from), Type::List(to)) => from.castable_to(to),
            (Type::Object(from), Type::Object(to)) => {
                from.len() == to.len()
                    && from.iter().all(|ff| {
                        to.iter()
                            .any(|tf| ff.name == tf.name && ff.type_id.castable_to(&tf.type_id))
                    })
            }
            (Type::Option(from), Type::Option(to)) => from.castable_to(to),
            // wrapping casts into an option; `null` becomes `none`
            (_, Type::Option(inner)) => {
                matches!(self, Type::Null) || self.castable_to(inner)
            }
            _ => false,
        }
    }

    /// Kinds that can appear as a `for` loop subject.
    pub fn is_iterable(&self) -> bool {
        matches!(
            self,
            Type::Range | Type::List(_) | Type::String | Type::Unknown
        )
    }

    /// The element type produced by iterating this type.
    pub fn element_type(&self) -> Type {
        match self {
            Type::Range => Type::Int,
            Type::List(inner) => (**inner).clone(),
            Type::String => Type::String,
            _ => Type::Unknown,
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Unknown => f.write_str("unknown"),
            Type::Never => f.write_str("never"),
            Type::Any => f.write_str("any"),
            Type::Null => f.write_str("null"),
            Type::Int => f.write_str("int"),
            Type::Float => f.write_str("float"),
            Type::Bool => f.write_str("bool"),
            Type::String => f.write_str("str"),
            Type::Range => f.write_str("range"),
            Type::List(inner) => write!(f, "[{inner}]"),
            Type::Object(fields) => {
                let fields = fields
                    .iter()
                    .map(|field| format!("{}: {}", field.name, field.type_id))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{{ {fields} }}")
            }
            Type::AnyObject => f.write_str("{ ? }"),
            Type::Option(inner) => write!(f, "?{inner}"),
            Type::Function(function) => {
                let params = match &function.params {
                    Params::Normal(params) => params
                        .iter()
                        .map(|(_, type_id)| format!("{type_id}"))
                        .collect::<Vec<_>>()
                        .join(", "),
                    Params::VarArgs(arg) => format!("..{arg}"),
                };
                write!(f, "fn({params}) -> {}", function.return_type)
            }
            Type::Singleton(name) => write!(f, "${name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_is_top() {
        assert!(Type::Any.accepts(&Type::Int));
        assert!(Type::Any.accepts(&Type::Object(vec![])));
        assert!(!Type::Int.accepts(&Type::Any));
    }

    #[test]
    fn test_object_structural_equality_ignores_order() {
        let left = Type::Object(vec![
            ObjectField {
                name: "a".into(),
                type_id: Type::Int,
            },
            ObjectField {
                name: "b".into(),
                type_id: Type::String,
            },
        ]);
        let right = Type::Object(vec![
            ObjectField {
                name: "b".into(),
                type_id: Type::String,
            },
            ObjectField {
                name: "a".into(),
                type_id: Type::Int,
            },
        ]);
        assert!(left.accepts(&right));
        assert!(right.accepts(&left));
    }

    #[test]
    fn test_any_object_accepts_objects_only() {
        let object = Type::Object(vec![ObjectField {
            name: "a".into(),
            type_id: Type::Int,
        }]);
        assert!(Type::AnyObject.accepts(&object));
        assert!(!object.accepts(&Type::AnyObject));
        assert!(!Type::AnyObject.accepts(&Type::Int));
    }

    #[test]
    fn test_none_fits_every_option() {
        // `none` synthesizes ?never
        let none = Type::Option(Box::new(Type::Never));
        assert!(Type::Option(Box::new(Type::Int)).accepts(&none));
        assert!(Type::Option(Box::new(Type::String)).accepts(&none));
    }

    #[test]
    fn test_join_of_divergent_branch() {
        assert_eq!(Type::Never.join(&Type::Int), Some(Type::Int));
        assert_eq!(Type::Int.join(&Type::Never), Some(Type::Int));
        assert_eq!(Type::Int.join(&Type::String), None);
    }

    #[test]
    fn test_scalar_casts() {
        assert!(Type::Int.castable_to(&Type::Float));
        assert!(Type::Bool.castable_to(&Type::Int));
        assert!(!Type::String.castable_to(&Type::Int));
        assert!(Type::Null.castable_to(&Type::Option(Box::new(Type::Int))));
        assert!(Type::Int.castable_to(&Type::Option(Box::new(Type::Int))));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            format!("{}", Type::List(Box::new(Type::Option(Box::new(Type::Int))))),
            "[?int]"
        );
        assert_eq!(
            format!("{}", Type::function(vec![("x".into(), Type::Int)], Type::Bool)),
            "fn(int) -> bool"
        );
    }
}

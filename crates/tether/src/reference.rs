//! Template reference descriptors consumed by the resolver.

use std::fmt;
use std::rc::Rc;

use serde_json::Value;

/// Recomputes an expression from the current values of its references, in
/// the order they were listed. `None` is undefined.
pub type ExpressionFn = Rc<dyn Fn(&[Option<Value>]) -> Option<Value>>;

/// A compiled expression: the label it was compiled from plus its
/// recomputation function.
#[derive(Clone)]
pub struct Signature {
    pub label: String,
    pub compute: ExpressionFn,
}

impl Signature {
    pub fn new(
        label: impl Into<String>,
        compute: impl Fn(&[Option<Value>]) -> Option<Value> + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            compute: Rc::new(compute),
        }
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signature")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// One member of a reference expression such as `foo[bar].baz`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Member {
    Literal(String),
    /// A nested reference whose value supplies the key.
    Ref(String),
}

#[derive(Debug, Clone)]
pub enum Reference {
    /// Dotted or bracketed keypath, possibly with a leading `.`, `../`, `~/`.
    Keypath(String),
    /// Name of an enclosing iteration's index reference.
    IndexRef(String),
    /// Name of an enclosing iteration's key reference.
    KeyRef(String),
    /// Reference expression: a base keypath followed by computed members.
    Member { base: String, members: Vec<Member> },
    /// Call of a registered function with referenced arguments.
    Call { method: String, args: Vec<String> },
    /// Compiled expression listing its referenced keypaths.
    Expression { refs: Vec<String>, signature: Signature },
}

impl Reference {
    pub fn keypath(keypath: impl Into<String>) -> Self {
        Reference::Keypath(keypath.into())
    }

    pub fn expression(refs: Vec<String>, signature: Signature) -> Self {
        Reference::Expression { refs, signature }
    }

    /// Human-readable form used in errors and warnings.
    pub fn describe(&self) -> String {
        match self {
            Reference::Keypath(k) | Reference::IndexRef(k) | Reference::KeyRef(k) => k.clone(),
            Reference::Member { base, members } => {
                let mut out = base.clone();
                for member in members {
                    match member {
                        Member::Literal(key) => {
                            out.push('.');
                            out.push_str(key);
                        }
                        Member::Ref(r) => {
                            out.push('[');
                            out.push_str(r);
                            out.push(']');
                        }
                    }
                }
                out
            }
            Reference::Call { method, args } => format!("{method}({})", args.join(", ")),
            Reference::Expression { signature, .. } => signature.label.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_member_reference() {
        let reference = Reference::Member {
            base: "foo".to_string(),
            members: vec![Member::Ref("a".to_string()), Member::Literal("baz".to_string())],
        };
        assert_eq!(reference.describe(), "foo[a].baz");
    }

    #[test]
    fn test_describe_call() {
        let reference = Reference::Call {
            method: "format".to_string(),
            args: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(reference.describe(), "format(a, b)");
    }
}

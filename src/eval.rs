use indexmap::IndexMap;

use crate::ast::*;
use crate::error::{CompileError, ErrorKind, Result};
use crate::lexer::Span;
use crate::scope::{ScopeId, ScopeTree};
use crate::value::Value;

/// Evaluates expressions against one frame of a [`ScopeTree`].
pub struct Evaluator<'s> {
    source: &'s str,
    scopes: &'s mut ScopeTree,
    scope: ScopeId,
}

impl<'s> Evaluator<'s> {
    pub fn new(source: &'s str, scopes: &'s mut ScopeTree, scope: ScopeId) -> Self {
        Self {
            source,
            scopes,
            scope,
        }
    }

    /// Source text of an expression, used to name it in errors.
    fn snippet(&self, span: Span) -> String {
        self.source
            .get(span.start..span.end)
            .unwrap_or_default()
            .trim()
            .to_string()
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<Value> {
        let fail = |kind| CompileError::new(kind, expr.span);
        match &expr.kind {
            ExprKind::Literal(literal) => Ok(match literal {
                Literal::Null => Value::Null,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Number(n) => Value::Number(*n),
                Literal::String(s) => Value::String(s.clone()),
            }),
            ExprKind::Identifier(name) => self
                .scopes
                .lookup(self.scope, name)
                .cloned()
                .ok_or_else(|| fail(ErrorKind::VariableNotDeclared(name.clone()))),
            ExprKind::Member { .. } | ExprKind::Call { .. } => {
                Ok(self.eval_chain(expr)?.unwrap_or_default())
            }
            ExprKind::Array(elements) => Ok(Value::Array(self.eval_elements(elements)?)),
            ExprKind::Object(entries) => self.eval_object(entries),
            ExprKind::Unary { op, operand } => {
                if *op == UnaryOp::BitNot {
                    return Err(fail(ErrorKind::UnsupportedOperator("~".to_string())));
                }
                let value = self.eval(operand)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::TypeOf => Value::String(value.type_of().to_string()),
                    UnaryOp::BitNot => Value::Null,
                })
            }
            ExprKind::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    let left = self.eval(left)?;
                    if left.is_truthy() {
                        self.eval(right)
                    } else {
                        Ok(left)
                    }
                }
                BinaryOp::Or => {
                    let left = self.eval(left)?;
                    if left.is_truthy() {
                        Ok(left)
                    } else {
                        self.eval(right)
                    }
                }
                BinaryOp::Nullish => {
                    let left = self.eval(left)?;
                    if left.is_nullish() {
                        self.eval(right)
                    } else {
                        Ok(left)
                    }
                }
                BinaryOp::BitAnd
                | BinaryOp::BitOr
                | BinaryOp::BitXor
                | BinaryOp::Shl
                | BinaryOp::Shr
                | BinaryOp::UShr
                | BinaryOp::In
                | BinaryOp::InstanceOf => {
                    Err(fail(ErrorKind::UnsupportedOperator(op.as_str().to_string())))
                }
                _ => {
                    let left = self.eval(left)?;
                    let right = self.eval(right)?;
                    Ok(apply_binary(*op, &left, &right))
                }
            },
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test)?.is_truthy() {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
            ExprKind::Assignment { target, op, value } => {
                let (name, keys) = self.target_path(target)?;
                let value = self.eval(value)?;
                let op = *op;
                self.write(&name, &keys, expr.span, op == AssignOp::Assign, |current| {
                    let updated = match (op, current) {
                        (AssignOp::Assign, _) => value,
                        (AssignOp::Add, Some(current)) => apply_binary(BinaryOp::Add, current, &value),
                        (_, Some(Value::Number(current))) => {
                            let op = match op {
                                AssignOp::Sub => BinaryOp::Sub,
                                AssignOp::Mul => BinaryOp::Mul,
                                AssignOp::Div => BinaryOp::Div,
                                _ => BinaryOp::Rem,
                            };
                            apply_binary(op, &Value::Number(*current), &value)
                        }
                        (_, current) => {
                            return Err(ErrorKind::InvalidUpdate {
                                operation: op.as_str().to_string(),
                                value_type: type_name(current).to_string(),
                            })
                        }
                    };
                    Ok((updated.clone(), updated))
                })
            }
            ExprKind::Update { target, op, prefix } => {
                let (name, keys) = self.target_path(target)?;
                let (op, prefix) = (*op, *prefix);
                self.write(&name, &keys, expr.span, false, |current| {
                    let Some(Value::Number(old)) = current else {
                        return Err(ErrorKind::InvalidUpdate {
                            operation: op.as_str().to_string(),
                            value_type: type_name(current).to_string(),
                        });
                    };
                    let new = match op {
                        UpdateOp::Increment => old + 1.0,
                        UpdateOp::Decrement => old - 1.0,
                    };
                    let result = if prefix { new } else { *old };
                    Ok((Value::Number(new), Value::Number(result)))
                })
            }
        }
    }

    /// Member and call chains. `None` means an optional link met a nullish
    /// value, which skips the rest of the chain.
    fn eval_chain(&mut self, expr: &Expr) -> Result<Option<Value>> {
        let fail = |kind| CompileError::new(kind, expr.span);
        match &expr.kind {
            ExprKind::Member {
                object,
                property,
                optional,
            } => {
                let Some(target) = self.eval_chain(object)? else {
                    return Ok(None);
                };
                if *optional && target.is_nullish() {
                    return Ok(None);
                }
                let key = self.property_key(property)?;
                match get_property(&target, &key) {
                    Some(value) => Ok(Some(value)),
                    None if *optional => Ok(Some(Value::Null)),
                    None => Err(fail(ErrorKind::PropertyNotExists(key.render()))),
                }
            }
            ExprKind::Call { callee, args } => {
                let Some(function) = self.eval_chain(callee)? else {
                    return Ok(None);
                };
                let args = self.eval_elements(args)?;
                match function {
                    Value::Function(function) => {
                        tracing::trace!(callee = %self.snippet(callee.span), "calling host function");
                        function
                            .call(&args)
                            .map(Some)
                            .map_err(|err| fail(ErrorKind::FunctionCallError(err)))
                    }
                    other => Err(fail(ErrorKind::NotAFunction(other.type_name().to_string()))),
                }
            }
            _ => self.eval(expr).map(Some),
        }
    }

    fn property_key(&mut self, property: &Property) -> Result<Value> {
        match property {
            Property::Named(name) => Ok(Value::String(name.clone())),
            Property::Computed(expr) => self.eval(expr),
        }
    }

    fn eval_elements(&mut self, elements: &[Element]) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(elements.len());
        for element in elements {
            let value = self.eval(&element.expr)?;
            if !element.spread {
                values.push(value);
                continue;
            }
            match value {
                Value::Array(items) => values.extend(items),
                Value::String(s) => values.extend(s.chars().map(|c| Value::String(c.to_string()))),
                _ => {
                    return Err(CompileError::new(
                        ErrorKind::InvalidSpreadInArray(self.snippet(element.expr.span)),
                        element.expr.span,
                    ))
                }
            }
        }
        Ok(values)
    }

    fn eval_object(&mut self, entries: &[ObjectEntry]) -> Result<Value> {
        let mut map = IndexMap::new();
        for entry in entries {
            match entry {
                ObjectEntry::Property { key, value } => {
                    let key = match key {
                        ObjectKey::Named(name) => name.clone(),
                        ObjectKey::Computed(expr) => match self.eval(expr)? {
                            key @ (Value::String(_) | Value::Number(_)) => key.render(),
                            _ => return Err(CompileError::new(ErrorKind::InvalidObjectKey, expr.span)),
                        },
                    };
                    let value = self.eval(value)?;
                    map.insert(key, value);
                }
                ObjectEntry::Spread(expr) => match self.eval(expr)? {
                    Value::Object(other) => map.extend(other),
                    _ => {
                        return Err(CompileError::new(
                            ErrorKind::InvalidSpreadInObject(self.snippet(expr.span)),
                            expr.span,
                        ))
                    }
                },
            }
        }
        Ok(Value::Object(map))
    }

    /// Splits an assignment target into its root variable and the keys
    /// leading from it.
    fn target_path(&mut self, target: &Expr) -> Result<(String, Vec<Value>)> {
        match &target.kind {
            ExprKind::Identifier(name) => Ok((name.clone(), Vec::new())),
            ExprKind::Member {
                object,
                property,
                optional: false,
            } => {
                let (name, mut keys) = self.target_path(object)?;
                keys.push(self.property_key(property)?);
                Ok((name, keys))
            }
            _ => Err(CompileError::new(ErrorKind::InvalidAssignment, target.span)),
        }
    }

    /// Applies `update` to the slot at `name.keys...`. The closure receives
    /// the current value (absent for a new binding or property) and returns
    /// the value to store plus the value of the whole expression.
    fn write<F>(&mut self, name: &str, keys: &[Value], span: Span, declare: bool, update: F) -> Result<Value>
    where
        F: FnOnce(Option<&Value>) -> std::result::Result<(Value, Value), ErrorKind>,
    {
        let fail = |kind| CompileError::new(kind, span);
        let Some(slot) = self.scopes.lookup_mut(self.scope, name) else {
            if declare && keys.is_empty() {
                let (stored, result) = update(None).map_err(fail)?;
                self.scopes.set_local(self.scope, name, stored);
                return Ok(result);
            }
            return Err(fail(ErrorKind::VariableNotDeclared(name.to_string())));
        };

        let Some((last, parents)) = keys.split_last() else {
            let (stored, result) = update(Some(&*slot)).map_err(fail)?;
            *slot = stored;
            return Ok(result);
        };

        let mut container = slot;
        for key in parents {
            container = match child_mut(container, key) {
                Some(child) => child,
                None => return Err(fail(ErrorKind::PropertyNotExists(key.render()))),
            };
        }

        match container {
            Value::Object(map) => {
                let key = last.render();
                let (stored, result) = update(map.get(&key)).map_err(fail)?;
                map.insert(key, stored);
                Ok(result)
            }
            Value::Array(items) => {
                // Writes may replace an element or append one, never leave holes.
                let Some(index) = array_index(last).filter(|index| *index <= items.len()) else {
                    return Err(fail(ErrorKind::InvalidAssignment));
                };
                let (stored, result) = update(items.get(index)).map_err(fail)?;
                match items.get_mut(index) {
                    Some(slot) => *slot = stored,
                    None => items.push(stored),
                }
                Ok(result)
            }
            _ => Err(fail(ErrorKind::InvalidAssignment)),
        }
    }
}

fn type_name(value: Option<&Value>) -> &'static str {
    value.map_or("undefined", Value::type_name)
}

fn array_index(key: &Value) -> Option<usize> {
    match key {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn child_mut<'v>(value: &'v mut Value, key: &Value) -> Option<&'v mut Value> {
    match value {
        Value::Object(map) => map.get_mut(&key.render()),
        Value::Array(items) => items.get_mut(array_index(key)?),
        _ => None,
    }
}

fn get_property(target: &Value, key: &Value) -> Option<Value> {
    match target {
        Value::Object(map) => map.get(&key.render()).cloned(),
        Value::Array(items) => match key {
            Value::String(name) if name == "length" => Some(Value::Number(items.len() as f64)),
            _ => items.get(array_index(key)?).cloned(),
        },
        Value::String(s) => match key {
            Value::String(name) if name == "length" => {
                Some(Value::Number(s.chars().count() as f64))
            }
            _ => s
                .chars()
                .nth(array_index(key)?)
                .map(|c| Value::String(c.to_string())),
        },
        _ => None,
    }
}

/// Operators that cannot fail once both sides are evaluated.
fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    let numbers = || (left.to_number(), right.to_number());
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::Number(_) | Value::Bool(_) | Value::Null, Value::Number(_) | Value::Bool(_) | Value::Null) => {
                let (l, r) = numbers();
                Value::Number(l + r)
            }
            _ => Value::String(left.render() + &right.render()),
        },
        BinaryOp::Sub => Value::Number(numbers().0 - numbers().1),
        BinaryOp::Mul => Value::Number(numbers().0 * numbers().1),
        BinaryOp::Div => Value::Number(numbers().0 / numbers().1),
        BinaryOp::Rem => Value::Number(numbers().0 % numbers().1),
        BinaryOp::Pow => Value::Number(numbers().0.powf(numbers().1)),
        BinaryOp::Eq => Value::Bool(left.loose_eq(right)),
        BinaryOp::NotEq => Value::Bool(!left.loose_eq(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_eq(right)),
        BinaryOp::StrictNotEq => Value::Bool(!left.strict_eq(right)),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let ordering = match (left, right) {
                (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
                _ => {
                    let (l, r) = numbers();
                    l.partial_cmp(&r)
                }
            };
            Value::Bool(match ordering {
                Some(ordering) => match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::LtEq => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                },
                None => false,
            })
        }
        // Short-circuiting and unsupported operators never get here.
        _ => Value::Null,
    }
}

//! `all`, `all_settled`, `race` and `any`.
//!
//! These only use the public promise contract: create a promise, subscribe to each input
//! with `then_or`, and settle through the resolver. The resolver's first-call-wins rule is
//! what makes every later input settlement a no-op.

use std::cell::RefCell;
use std::rc::Rc;

use crate::{Error, EventLoop, Promise, Resolver, Settlement, Value};

/// Selects one of the four combinators for [`EventLoop::combine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    /// Fulfills with every value in input order, or rejects with the first rejection.
    All,

    /// Fulfills with every outcome in input order. Never rejects.
    AllSettled,

    /// Settles like whichever input settles first.
    Race,

    /// Fulfills with the first fulfillment, or rejects with an aggregate of every reason.
    Any,
}

impl Combinator {
    /// Applies the combinator to a list-typed value.
    ///
    /// Any other kind of value is rejected before a promise is created.
    pub fn apply(self, lp: &EventLoop, input: Value) -> Result<Promise, Error> {
        let items = match input {
            Value::List(items) => items,
            other => {
                return Err(Error::NotAList {
                    found: other.type_name(),
                })
            }
        };
        let items = items.iter().cloned();

        Ok(match self {
            Combinator::All => all(lp, items),
            Combinator::AllSettled => all_settled(lp, items),
            Combinator::Race => race(lp, items),
            Combinator::Any => any(lp, items),
        })
    }
}

/// Converts each input into a promise; plain values count as already fulfilled.
fn promises(lp: &EventLoop, inputs: impl IntoIterator<Item = Value>) -> Vec<Promise> {
    inputs.into_iter().map(|input| lp.resolve(input)).collect()
}

/// Per-combinator bookkeeping: one slot per input and a count of unfilled slots.
struct Slots {
    values: Vec<Value>,
    remaining: usize,
}

impl Slots {
    fn new(len: usize) -> Rc<RefCell<Slots>> {
        Rc::new(RefCell::new(Slots {
            values: vec![Value::Undefined; len],
            remaining: len,
        }))
    }

    /// Fills slot `index`; returns every value once the last slot is filled.
    fn fill(slots: &RefCell<Slots>, index: usize, value: Value) -> Option<Vec<Value>> {
        let mut slots = slots.borrow_mut();
        slots.values[index] = value;
        slots.remaining -= 1;
        if slots.remaining == 0 {
            Some(std::mem::take(&mut slots.values))
        } else {
            None
        }
    }
}

/// See [`EventLoop::all`].
pub fn all(lp: &EventLoop, inputs: impl IntoIterator<Item = Value>) -> Promise {
    let inputs = promises(lp, inputs);
    lp.new_promise(move |_, resolver| {
        if inputs.is_empty() {
            resolver.resolve(Vec::<Value>::new());
            return Ok(());
        }

        let slots = Slots::new(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            let (slots, fulfill, reject) = (slots.clone(), resolver.clone(), resolver.clone());
            input.then_or(
                move |_, value| {
                    if let Some(values) = Slots::fill(&slots, index, value) {
                        fulfill.resolve(values);
                    }
                    Ok(Value::Undefined)
                },
                move |_, reason| {
                    reject.reject(reason);
                    Ok(Value::Undefined)
                },
            );
        }
        Ok(())
    })
}

/// See [`EventLoop::all_settled`].
pub fn all_settled(lp: &EventLoop, inputs: impl IntoIterator<Item = Value>) -> Promise {
    let inputs = promises(lp, inputs);
    lp.new_promise(move |_, resolver| {
        if inputs.is_empty() {
            resolver.resolve(Vec::<Value>::new());
            return Ok(());
        }

        let slots = Slots::new(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            let (on_slots, on_resolver) = (slots.clone(), resolver.clone());
            let (off_slots, off_resolver) = (slots.clone(), resolver.clone());
            input.then_or(
                move |_, value| {
                    record(&on_slots, &on_resolver, index, Settlement::Fulfilled(value));
                    Ok(Value::Undefined)
                },
                move |_, reason| {
                    record(&off_slots, &off_resolver, index, Settlement::Rejected(reason));
                    Ok(Value::Undefined)
                },
            );
        }
        Ok(())
    })
}

/// Stores one outcome record and fulfills once every input has one.
fn record(slots: &RefCell<Slots>, resolver: &Resolver, index: usize, outcome: Settlement) {
    if let Some(records) = Slots::fill(slots, index, outcome.into()) {
        resolver.resolve(records);
    }
}

/// See [`EventLoop::race`].
pub fn race(lp: &EventLoop, inputs: impl IntoIterator<Item = Value>) -> Promise {
    let inputs = promises(lp, inputs);
    lp.new_promise(move |_, resolver| {
        for input in &inputs {
            let (fulfill, reject) = (resolver.clone(), resolver.clone());
            input.then_or(
                move |_, value| {
                    fulfill.resolve(value);
                    Ok(Value::Undefined)
                },
                move |_, reason| {
                    reject.reject(reason);
                    Ok(Value::Undefined)
                },
            );
        }
        Ok(())
    })
}

/// See [`EventLoop::any`].
pub fn any(lp: &EventLoop, inputs: impl IntoIterator<Item = Value>) -> Promise {
    let inputs = promises(lp, inputs);
    lp.new_promise(move |_, resolver| {
        if inputs.is_empty() {
            resolver.reject(Value::aggregate(Vec::new()));
            return Ok(());
        }

        let slots = Slots::new(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            let (slots, fulfill, reject) = (slots.clone(), resolver.clone(), resolver.clone());
            input.then_or(
                move |_, value| {
                    fulfill.resolve(value);
                    Ok(Value::Undefined)
                },
                move |_, reason| {
                    if let Some(reasons) = Slots::fill(&slots, index, reason) {
                        reject.reject(Value::aggregate(reasons));
                    }
                    Ok(Value::Undefined)
                },
            );
        }
        Ok(())
    })
}

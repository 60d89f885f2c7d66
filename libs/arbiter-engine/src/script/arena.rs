//! Per-thread registry of the mutable containers one run creates.
//!
//! Reference counting never frees a list that contains itself, or a dict and
//! a list that point at each other. While an [`Arena`] is open every new
//! list, dict and set registers a weak handle here; closing the arena empties
//! whatever is still alive, which breaks those cycles and returns their
//! memory before the worker thread takes the next case.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use super::value::{drain_nested, DictObj, ListObj, SetObj, Value};

const FIRST_PRUNE: usize = 1024;

enum Tracked {
    List(Weak<RefCell<ListObj>>),
    Dict(Weak<RefCell<DictObj>>),
    Set(Weak<RefCell<SetObj>>),
}

impl Tracked {
    fn is_live(&self) -> bool {
        match self {
            Tracked::List(w) => w.strong_count() > 0,
            Tracked::Dict(w) => w.strong_count() > 0,
            Tracked::Set(w) => w.strong_count() > 0,
        }
    }
}

struct Registry {
    open: bool,
    tracked: Vec<Tracked>,
    prune_at: usize,
}

impl Registry {
    const fn closed() -> Self {
        Self {
            open: false,
            tracked: Vec::new(),
            prune_at: FIRST_PRUNE,
        }
    }

    fn push(&mut self, entry: Tracked) {
        if !self.open {
            return;
        }
        if self.tracked.len() >= self.prune_at {
            self.tracked.retain(Tracked::is_live);
            self.prune_at = (self.tracked.len() * 2).max(FIRST_PRUNE);
        }
        self.tracked.push(entry);
    }
}

thread_local! {
    static REGISTRY: RefCell<Registry> = const { RefCell::new(Registry::closed()) };
}

fn register(entry: Tracked) {
    let _ = REGISTRY.try_with(|cell| {
        if let Ok(mut registry) = cell.try_borrow_mut() {
            registry.push(entry);
        }
    });
}

pub fn track_list(list: &Rc<RefCell<ListObj>>) {
    register(Tracked::List(Rc::downgrade(list)));
}

pub fn track_dict(dict: &Rc<RefCell<DictObj>>) {
    register(Tracked::Dict(Rc::downgrade(dict)));
}

pub fn track_set(set: &Rc<RefCell<SetObj>>) {
    register(Tracked::Set(Rc::downgrade(set)));
}

/// Number of registered containers that are still alive.
pub fn live_containers() -> usize {
    REGISTRY
        .try_with(|cell| cell.borrow().tracked.iter().filter(|t| t.is_live()).count())
        .unwrap_or(0)
}

/// Guard for one run. Containers still alive when it drops are emptied.
#[must_use = "containers are released when the arena drops"]
pub struct Arena {
    _thread_bound: PhantomData<*const ()>,
}

impl Arena {
    pub fn open() -> Self {
        let _ = REGISTRY.try_with(|cell| {
            let mut registry = cell.borrow_mut();
            registry.open = true;
            registry.tracked.clear();
            registry.prune_at = FIRST_PRUNE;
        });
        Self {
            _thread_bound: PhantomData,
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        let tracked = REGISTRY
            .try_with(|cell| {
                let mut registry = cell.borrow_mut();
                registry.open = false;
                std::mem::take(&mut registry.tracked)
            })
            .unwrap_or_default();

        for entry in tracked {
            let contents = match entry {
                Tracked::List(w) => take_contents(&w, ListObj::drain),
                Tracked::Dict(w) => take_contents(&w, DictObj::drain),
                Tracked::Set(w) => take_contents(&w, SetObj::drain),
            };
            if let Some(values) = contents {
                drain_nested(values);
            }
        }
    }
}

// A container still borrowed here belongs to a caller outside the run.
fn take_contents<T>(weak: &Weak<RefCell<T>>, drain: fn(&mut T) -> Vec<Value>) -> Option<Vec<Value>> {
    let rc = weak.upgrade()?;
    let mut obj = rc.try_borrow_mut().ok()?;
    let values = drain(&mut obj);
    Some(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::heap;

    #[test]
    fn closing_the_arena_frees_self_referencing_lists() {
        std::thread::spawn(|| {
            heap::install(Some(1 << 20));
            let arena = Arena::open();
            let weak = {
                let list = Value::list(vec![Value::Int(1)]);
                let Value::List(rc) = &list else { unreachable!() };
                rc.borrow_mut().update(|items| items.push(list.clone()));
                Rc::downgrade(rc)
            };
            assert!(weak.upgrade().is_some(), "the cycle outlives its last binding");
            assert_eq!(live_containers(), 1);

            drop(arena);
            assert!(weak.upgrade().is_none());
            assert_eq!(heap::live_bytes(), 0);
            heap::uninstall();
        })
        .join()
        .unwrap();
    }

    #[test]
    fn dict_and_list_cycle_is_broken() {
        std::thread::spawn(|| {
            let arena = Arena::open();
            let (list_weak, dict_weak) = {
                let list = Value::list(Vec::new());
                let mut dict = DictObj::new();
                dict.insert(Value::str("items"), list.clone()).unwrap();
                let dict = Value::dict(dict);
                let (Value::List(l), Value::Dict(d)) = (&list, &dict) else { unreachable!() };
                l.borrow_mut().update(|items| items.push(dict.clone()));
                (Rc::downgrade(l), Rc::downgrade(d))
            };
            assert_eq!(live_containers(), 2);

            drop(arena);
            assert!(list_weak.upgrade().is_none());
            assert!(dict_weak.upgrade().is_none());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn nothing_registers_outside_an_arena() {
        std::thread::spawn(|| {
            let _list = Value::list(Vec::new());
            assert_eq!(live_containers(), 0);
        })
        .join()
        .unwrap();
    }
}

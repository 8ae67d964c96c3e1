use std::cell::Cell;
use std::rc::Rc;

pub const DEFAULT_ROOT_MARGIN: &str = "0px";

#[derive(Clone, Debug, PartialEq)]
pub struct ObserverOptions {
    pub root_margin: String,
    pub thresholds: Vec<f64>,
    pub once: bool,
}

impl Default for ObserverOptions {
    fn default() -> Self {
        Self {
            root_margin: DEFAULT_ROOT_MARGIN.to_string(),
            thresholds: vec![0.0],
            once: false,
        }
    }
}

impl ObserverOptions {
    pub fn with_root_margin(mut self, root_margin: &str) -> Self {
        self.root_margin = root_margin.to_string();
        self
    }

    pub fn with_thresholds(mut self, thresholds: &[f64]) -> Self {
        self.thresholds = thresholds.to_vec();
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn normalized(&self) -> Self {
        let root_margin = if is_valid_root_margin(&self.root_margin) {
            self.root_margin.trim().to_string()
        } else {
            DEFAULT_ROOT_MARGIN.to_string()
        };

        let mut thresholds: Vec<f64> = self
            .thresholds
            .iter()
            .copied()
            .filter(|value| value.is_finite() && (0.0..=1.0).contains(value))
            .collect();
        thresholds.sort_by(|a, b| a.total_cmp(b));
        thresholds.dedup();
        if thresholds.is_empty() {
            thresholds.push(0.0);
        }

        Self {
            root_margin,
            thresholds,
            once: self.once,
        }
    }
}

fn is_valid_root_margin(value: &str) -> bool {
    let parts: Vec<&str> = value.split_whitespace().collect();
    (1..=4).contains(&parts.len()) && parts.iter().all(|part| is_margin_length(part))
}

fn is_margin_length(part: &str) -> bool {
    if part == "0" {
        return true;
    }

    let number = part
        .strip_suffix("px")
        .or_else(|| part.strip_suffix('%'));

    number
        .and_then(|value| value.parse::<f64>().ok())
        .is_some_and(f64::is_finite)
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Visibility {
    pub is_intersecting: bool,
    pub ratio: f64,
    pub bounds: Rect,
}

/// Shared flag handed to observer callbacks. Once revoked, the callback must
/// drop whatever it was about to deliver.
#[derive(Clone, Debug)]
pub struct Liveness(Rc<Cell<bool>>);

impl Liveness {
    pub fn new() -> Self {
        Self(Rc::new(Cell::new(true)))
    }

    pub fn is_live(&self) -> bool {
        self.0.get()
    }

    pub fn revoke(&self) {
        self.0.set(false);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

pub trait Release {
    fn release(self);
}

impl<S: Release> Release for Option<S> {
    fn release(self) {
        if let Some(subscription) = self {
            subscription.release();
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotChange {
    Inert,
    Unchanged,
    Subscribed,
    Resubscribed,
    Released,
}

struct Attached<T, S> {
    target: T,
    subscription: S,
    liveness: Liveness,
}

pub struct ObservationSlot<T, S: Release> {
    current: Option<Attached<T, S>>,
}

impl<T, S: Release> Default for ObservationSlot<T, S> {
    fn default() -> Self {
        Self { current: None }
    }
}

impl<T, S: Release> ObservationSlot<T, S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_attached(&self) -> bool {
        self.current.is_some()
    }

    pub fn target(&self) -> Option<&T> {
        self.current.as_ref().map(|attached| &attached.target)
    }

    /// Brings the slot in line with `target`, releasing the previous
    /// subscription before creating a new one.
    pub fn sync<Same, Subscribe>(
        &mut self,
        target: Option<T>,
        same: Same,
        subscribe: Subscribe,
    ) -> SlotChange
    where
        Same: Fn(&T, &T) -> bool,
        Subscribe: FnOnce(&T, Liveness) -> S,
    {
        match (self.current.as_ref(), target) {
            (None, None) => SlotChange::Inert,
            (Some(_), None) => {
                self.release();
                SlotChange::Released
            }
            (Some(attached), Some(next)) if same(&attached.target, &next) => SlotChange::Unchanged,
            (previous, Some(next)) => {
                let change = if previous.is_some() {
                    SlotChange::Resubscribed
                } else {
                    SlotChange::Subscribed
                };
                self.release();

                let liveness = Liveness::new();
                let subscription = subscribe(&next, liveness.clone());
                self.current = Some(Attached {
                    target: next,
                    subscription,
                    liveness,
                });
                change
            }
        }
    }

    pub fn release(&mut self) -> bool {
        let Some(attached) = self.current.take() else {
            return false;
        };

        attached.liveness.revoke();
        attached.subscription.release();
        true
    }
}

impl<T, S: Release> Drop for ObservationSlot<T, S> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Filters reports for a `once` observation: the first intersecting report
/// passes and latches, everything after it is swallowed.
#[derive(Clone, Copy, Debug, Default)]
pub struct VisibilityLatch {
    once: bool,
    latched: bool,
}

impl VisibilityLatch {
    pub fn new(once: bool) -> Self {
        Self {
            once,
            latched: false,
        }
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }

    pub fn accept(&mut self, visibility: Visibility) -> Option<Visibility> {
        if self.latched {
            return None;
        }
        if self.once && visibility.is_intersecting {
            self.latched = true;
        }
        Some(visibility)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FakeSubscription {
        node: u32,
        released: Rc<RefCell<Vec<u32>>>,
    }

    impl Release for FakeSubscription {
        fn release(self) {
            self.released.borrow_mut().push(self.node);
        }
    }

    fn subscriber(
        created: Rc<RefCell<Vec<u32>>>,
        released: Rc<RefCell<Vec<u32>>>,
    ) -> impl FnOnce(&u32, Liveness) -> FakeSubscription {
        move |node, _liveness| {
            created.borrow_mut().push(*node);
            FakeSubscription {
                node: *node,
                released,
            }
        }
    }

    #[test]
    fn options_degrade_to_safe_defaults() {
        let options = ObserverOptions::default()
            .with_root_margin("ten pixels")
            .with_thresholds(&[1.5, f64::NAN, -0.1])
            .normalized();

        assert_eq!(options.root_margin, DEFAULT_ROOT_MARGIN);
        assert_eq!(options.thresholds, vec![0.0]);
    }

    #[test]
    fn options_keep_valid_values_sorted() {
        let options = ObserverOptions::default()
            .with_root_margin(" 100% 0px -20px 0 ")
            .with_thresholds(&[0.5, 0.0, 0.5, 1.0])
            .normalized();

        assert_eq!(options.root_margin, "100% 0px -20px 0");
        assert_eq!(options.thresholds, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn slot_keeps_one_subscription_per_node() {
        let created = Rc::new(RefCell::new(Vec::new()));
        let released = Rc::new(RefCell::new(Vec::new()));
        let mut slot = ObservationSlot::new();

        let eq = |a: &u32, b: &u32| a == b;
        assert_eq!(
            slot.sync(None, eq, subscriber(created.clone(), released.clone())),
            SlotChange::Inert
        );
        assert_eq!(
            slot.sync(Some(1), eq, subscriber(created.clone(), released.clone())),
            SlotChange::Subscribed
        );
        assert_eq!(
            slot.sync(Some(1), eq, subscriber(created.clone(), released.clone())),
            SlotChange::Unchanged
        );
        assert_eq!(
            slot.sync(Some(2), eq, subscriber(created.clone(), released.clone())),
            SlotChange::Resubscribed
        );
        assert_eq!(
            slot.sync(None, eq, subscriber(created.clone(), released.clone())),
            SlotChange::Released
        );

        assert_eq!(*created.borrow(), vec![1, 2]);
        assert_eq!(*released.borrow(), vec![1, 2]);
        assert!(!slot.is_attached());
    }

    #[test]
    fn callbacks_after_release_are_silenced() {
        let delivered = Rc::new(RefCell::new(Vec::new()));
        let captured: Rc<RefCell<Option<Box<dyn Fn(Visibility)>>>> = Rc::new(RefCell::new(None));
        let released = Rc::new(RefCell::new(Vec::new()));
        let mut slot = ObservationSlot::new();

        {
            let delivered = delivered.clone();
            let captured = captured.clone();
            let released = released.clone();
            slot.sync(Some(7u32), |a, b| a == b, move |node, liveness| {
                *captured.borrow_mut() = Some(Box::new(move |visibility: Visibility| {
                    if liveness.is_live() {
                        delivered.borrow_mut().push(visibility.is_intersecting);
                    }
                }));
                FakeSubscription {
                    node: *node,
                    released,
                }
            });
        }

        let fire = |intersecting: bool| {
            if let Some(callback) = captured.borrow().as_ref() {
                callback(Visibility {
                    is_intersecting: intersecting,
                    ..Visibility::default()
                });
            }
        };

        fire(true);
        assert!(slot.release());
        fire(false);

        assert_eq!(*delivered.borrow(), vec![true]);
        assert_eq!(*released.borrow(), vec![7]);
        assert!(!slot.release());
    }

    #[test]
    fn dropping_the_slot_releases_the_subscription() {
        let created = Rc::new(RefCell::new(Vec::new()));
        let released = Rc::new(RefCell::new(Vec::new()));

        {
            let mut slot = ObservationSlot::new();
            slot.sync(Some(3u32), |a, b| a == b, subscriber(created, released.clone()));
        }

        assert_eq!(*released.borrow(), vec![3]);
    }

    #[test]
    fn failed_subscriptions_still_occupy_the_slot() {
        let released = Rc::new(RefCell::new(Vec::new()));
        let mut slot: ObservationSlot<u32, Option<FakeSubscription>> = ObservationSlot::new();

        slot.sync(Some(4), |a, b| a == b, |_, _| None);
        assert!(slot.is_attached());
        assert_eq!(
            slot.sync(Some(4), |a, b| a == b, |_, _| None),
            SlotChange::Unchanged
        );

        let tracked = released.clone();
        slot.sync(Some(5), |a, b| a == b, move |node, _| {
            Some(FakeSubscription {
                node: *node,
                released: tracked,
            })
        });
        assert!(slot.release());
        assert_eq!(*released.borrow(), vec![5]);
    }

    #[test]
    fn once_latch_passes_until_first_intersection() {
        let mut latch = VisibilityLatch::new(true);
        let hidden = Visibility::default();
        let shown = Visibility {
            is_intersecting: true,
            ratio: 0.4,
            ..Visibility::default()
        };

        assert_eq!(latch.accept(hidden), Some(hidden));
        assert_eq!(latch.accept(shown), Some(shown));
        assert!(latch.is_latched());
        assert_eq!(latch.accept(hidden), None);

        let mut continuous = VisibilityLatch::new(false);
        continuous.accept(shown);
        assert_eq!(continuous.accept(hidden), Some(hidden));
    }
}

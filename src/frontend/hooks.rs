use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use js_sys::Object;
use wasm_bindgen_futures::spawn_local;
use web_sys::{window, Element, HtmlElement};
use yew::prelude::*;

use super::dom::{
    document, is_touch, load_text_splitter, media_query, observe_web_vitals, page_context,
    page_url, performance_now, scroll_y, trigger_geometry, viewport_size, BeaconSink, DomSplit,
    ListenerGuard, RafLoop, ResizeWatcher, ScrollMarkers, SplitCounts, VisibilityObserver,
};
use crate::device::{classify, DeviceTracker, ViewportClassification, TOUCH_MEDIA_QUERY};
use crate::logging::{log_event, LogLevel};
use crate::observe::{Liveness, ObservationSlot, ObserverOptions, Release, Visibility};
use crate::prefetch::PrefetchRegistry;
use crate::scroll::{
    Scrub, ScrollTrigger, ScrollTriggerConfig, TriggerEvent, OBSERVATION_ROOT_MARGIN,
};
use crate::split::{Granularity, SplitGuard, WidthTracker};
use crate::tween::{TransformController, TransformDescriptor};
use crate::vitals::{Reporter, VITALS_ENDPOINT};

const PREFETCH_ROOT_MARGIN: &str = "200px";

fn same_element(a: &Element, b: &Element) -> bool {
    Object::is(a, b)
}

#[hook]
pub fn use_device() -> ViewportClassification {
    let classification = use_state_eq(|| classify(viewport_size().0, is_touch()));

    {
        let setter = classification.setter();
        use_effect_with((), move |_| {
            let tracker = Rc::new(RefCell::new(DeviceTracker::new()));
            let refresh = move || {
                let changed = tracker.borrow_mut().update(viewport_size().0, is_touch());
                if let Some(next) = changed {
                    setter.set(next);
                }
            };
            refresh();

            let on_resize = window()
                .and_then(|win| ListenerGuard::passive(&win, "resize", refresh.clone()));
            let on_touch_change = media_query(TOUCH_MEDIA_QUERY)
                .and_then(|query| ListenerGuard::passive(&query, "change", refresh));

            move || {
                drop(on_resize);
                drop(on_touch_change);
            }
        });
    }

    *classification
}

#[derive(Clone, PartialEq)]
pub struct InViewHandle {
    pub node: NodeRef,
    pub visibility: Option<Visibility>,
}

impl InViewHandle {
    pub fn in_view(&self) -> bool {
        self.visibility
            .map(|visibility| visibility.is_intersecting)
            .unwrap_or(false)
    }
}

type InViewSlot = ObservationSlot<(Element, ObserverOptions), Option<VisibilityObserver>>;

#[hook]
pub fn use_in_view(options: ObserverOptions) -> InViewHandle {
    let node = use_node_ref();
    let visibility = use_state_eq(|| None::<Visibility>);
    let slot = use_mut_ref(InViewSlot::new);

    {
        let node = node.clone();
        let slot = slot.clone();
        let setter = visibility.setter();
        use_effect(move || {
            let target = node.cast::<Element>().map(|element| (element, options));
            slot.borrow_mut().sync(
                target,
                |(a, a_options), (b, b_options)| same_element(a, b) && a_options == b_options,
                |(element, options), liveness| {
                    VisibilityObserver::observe(element, options, liveness, move |next| {
                        setter.set(Some(next))
                    })
                },
            );
            || ()
        });
    }

    {
        let slot = slot.clone();
        use_effect_with((), move |_| {
            move || {
                slot.borrow_mut().release();
            }
        });
    }

    InViewHandle {
        node,
        visibility: *visibility,
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct ScrollSnapshot {
    progress: f64,
    active: bool,
    last_event: Option<TriggerEvent>,
}

#[derive(Clone, PartialEq)]
pub struct ScrollTriggerHandle {
    pub node: NodeRef,
    pub progress: f64,
    pub active: bool,
    pub last_event: Option<TriggerEvent>,
}

struct TriggerRuntime {
    trigger: RefCell<ScrollTrigger>,
    element: Element,
    markers: Option<ScrollMarkers>,
    in_range: Cell<bool>,
    last_event: Cell<Option<TriggerEvent>>,
    last_frame: Cell<Option<f64>>,
    publish_to: UseStateSetter<ScrollSnapshot>,
}

impl TriggerRuntime {
    fn publish(&self, events: Vec<TriggerEvent>) {
        if let Some(event) = events.last() {
            self.last_event.set(Some(*event));
        }

        let trigger = self.trigger.borrow();
        self.publish_to.set(ScrollSnapshot {
            progress: trigger.progress(),
            active: trigger.is_active(),
            last_event: self.last_event.get(),
        });
    }

    fn sync_scroll(&self) -> bool {
        let step = self
            .trigger
            .borrow_mut()
            .scrolled_to(scroll_y(), self.in_range.get());
        self.publish(step.events);
        step.animate
    }

    fn sync_layout(&self) -> bool {
        let geometry = trigger_geometry(&self.element);
        let events = self.trigger.borrow_mut().refresh(geometry, scroll_y());
        if let Some(markers) = self.markers.as_ref() {
            markers.place(self.trigger.borrow().config().marker_lines(geometry));
        }
        self.publish(events);
        self.in_range.get() && self.trigger.borrow().is_settling()
    }

    fn frame(&self, timestamp_ms: f64) -> bool {
        let dt = self
            .last_frame
            .replace(Some(timestamp_ms))
            .map(|previous| ((timestamp_ms - previous) / 1000.0).max(0.0))
            .unwrap_or(0.0);

        let moving = self.trigger.borrow_mut().advance(dt);
        self.publish(Vec::new());
        if !moving {
            self.last_frame.set(None);
        }
        moving
    }
}

struct TriggerBinding {
    runtime: Rc<TriggerRuntime>,
    liveness: Liveness,
    observer: Option<VisibilityObserver>,
    _on_scroll: Option<ListenerGuard>,
    _on_resize: Option<ListenerGuard>,
    _frames: Rc<RafLoop>,
}

impl TriggerBinding {
    fn bind(
        element: Element,
        config: ScrollTriggerConfig,
        publish_to: UseStateSetter<ScrollSnapshot>,
    ) -> Self {
        let geometry = trigger_geometry(&element);
        let markers = if config.markers {
            let markers = ScrollMarkers::create();
            if let Some(markers) = markers.as_ref() {
                markers.place(config.marker_lines(geometry));
            }
            markers
        } else {
            None
        };
        let smooth = matches!(config.scrub, Scrub::Smooth(_));
        let (trigger, events) = ScrollTrigger::new(config, geometry, scroll_y());

        let runtime = Rc::new(TriggerRuntime {
            trigger: RefCell::new(trigger),
            element,
            markers,
            in_range: Cell::new(false),
            last_event: Cell::new(None),
            last_frame: Cell::new(None),
            publish_to,
        });
        runtime.publish(events);

        let frames = {
            let weak: Weak<TriggerRuntime> = Rc::downgrade(&runtime);
            Rc::new(RafLoop::new(move |timestamp_ms| {
                weak.upgrade()
                    .map(|runtime| runtime.frame(timestamp_ms))
                    .unwrap_or(false)
            }))
        };

        let on_scroll = {
            let runtime = runtime.clone();
            let frames = frames.clone();
            window().and_then(|win| {
                ListenerGuard::passive(&win, "scroll", move || {
                    if runtime.sync_scroll() && smooth {
                        frames.start();
                    }
                })
            })
        };

        let on_resize = {
            let runtime = runtime.clone();
            let frames = frames.clone();
            window().and_then(|win| {
                ListenerGuard::passive(&win, "resize", move || {
                    if runtime.sync_layout() && smooth {
                        frames.start();
                    }
                })
            })
        };

        let liveness = Liveness::new();
        let options = ObserverOptions::default().with_root_margin(OBSERVATION_ROOT_MARGIN);
        let observer = {
            let element = runtime.element.clone();
            let runtime = runtime.clone();
            let frames = frames.clone();
            VisibilityObserver::observe(&element, &options, liveness.clone(), move |visibility| {
                runtime.in_range.set(visibility.is_intersecting);
                if runtime.sync_scroll() && smooth {
                    frames.start();
                }
            })
        };

        Self {
            runtime,
            liveness,
            observer,
            _on_scroll: on_scroll,
            _on_resize: on_resize,
            _frames: frames,
        }
    }

    fn unbind(self) {
        self.liveness.revoke();
        self.observer.release();
        self.runtime.in_range.set(false);
    }
}

#[hook]
pub fn use_scroll_trigger(config: ScrollTriggerConfig) -> ScrollTriggerHandle {
    let node = use_node_ref();
    let snapshot = use_state_eq(ScrollSnapshot::default);

    {
        let node = node.clone();
        let setter = snapshot.setter();
        use_effect_with(config, move |config| {
            let binding = node
                .cast::<Element>()
                .map(|element| TriggerBinding::bind(element, config.clone(), setter));

            move || {
                if let Some(binding) = binding {
                    binding.unbind();
                }
            }
        });
    }

    ScrollTriggerHandle {
        node,
        progress: snapshot.progress,
        active: snapshot.active,
        last_event: snapshot.last_event,
    }
}

#[derive(Clone, PartialEq)]
pub struct TransformHandle {
    pub node: NodeRef,
    pub apply: Callback<TransformDescriptor>,
}

fn write_transform(node: &NodeRef, css: &str) {
    if let Some(element) = node.cast::<HtmlElement>() {
        let _ = element.style().set_property("transform", css);
    }
}

/// Animates the node's CSS transform toward each descriptor passed to
/// `apply`. A descriptor that arrives mid-flight redirects from where the
/// element currently is.
#[hook]
pub fn use_transform() -> TransformHandle {
    let node = use_node_ref();
    let controller = use_mut_ref(TransformController::new);
    let frames = use_mut_ref(|| None::<RafLoop>);

    {
        let node = node.clone();
        let controller = controller.clone();
        let frames = frames.clone();
        use_effect_with((), move |_| {
            let loop_controller = controller.clone();
            let loop_node = node.clone();
            *frames.borrow_mut() = Some(RafLoop::new(move |timestamp_ms| {
                let mut controller = loop_controller.borrow_mut();
                let state = controller.tick(timestamp_ms);
                write_transform(&loop_node, &state.to_css());
                controller.is_animating()
            }));

            move || {
                controller.borrow_mut().cancel(performance_now());
                frames.borrow_mut().take();
            }
        });
    }

    let apply = {
        let node = node.clone();
        use_callback((), move |descriptor: TransformDescriptor, _| {
            let animating = {
                let mut controller = controller.borrow_mut();
                let now = performance_now();
                controller.apply(&descriptor, now);
                write_transform(&node, &controller.tick(now).to_css());
                controller.is_animating()
            };
            if animating {
                if let Some(frames) = frames.borrow().as_ref() {
                    frames.start();
                }
            }
        })
    };

    TransformHandle { node, apply }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SplitStatus {
    Pending,
    Ready(SplitCounts),
    Failed(String),
}

#[derive(Clone, PartialEq)]
pub struct SplitTextHandle {
    pub node: NodeRef,
    pub status: SplitStatus,
}

/// Renders `text` into the node split at `granularity`. The node must be
/// rendered without children; the hook owns its content.
#[hook]
pub fn use_split_text(text: AttrValue, granularity: Granularity) -> SplitTextHandle {
    let node = use_node_ref();
    let status = use_state_eq(|| SplitStatus::Pending);

    {
        let node = node.clone();
        let setter = status.setter();
        use_effect_with((text, granularity), move |(text, granularity)| {
            let text = text.to_string();
            let granularity = *granularity;
            let guard = Rc::new(RefCell::new(SplitGuard::<DomSplit>::new()));
            let watcher = Rc::new(RefCell::new(None::<ResizeWatcher>));
            let liveness = Liveness::new();
            let container = node.cast::<HtmlElement>();

            if let Some(container) = container {
                container.set_text_content(Some(&text));
                setter.set(SplitStatus::Pending);

                let guard = guard.clone();
                let watcher = watcher.clone();
                let liveness = liveness.clone();
                spawn_local(async move {
                    let splitter = match load_text_splitter().await {
                        Ok(splitter) => splitter,
                        Err(error) => {
                            log_event(
                                LogLevel::Warn,
                                "text_split_engine_failed",
                                serde_json::json!({ "error": error.to_string() }),
                            );
                            if liveness.is_live() {
                                setter.set(SplitStatus::Failed(error.to_string()));
                            }
                            return;
                        }
                    };
                    if !liveness.is_live() {
                        return;
                    }

                    let resplit = {
                        let guard = guard.clone();
                        let container = container.clone();
                        let setter = setter.clone();
                        move || {
                            let mut guard = guard.borrow_mut();
                            guard.split(&text, |original| {
                                splitter.split(&container, original, granularity)
                            });
                            if let Some(split) = guard.current() {
                                setter.set(SplitStatus::Ready(split.counts()));
                            }
                        }
                    };
                    resplit();

                    if granularity.depends_on_layout() {
                        let mut width = WidthTracker::new();
                        *watcher.borrow_mut() = ResizeWatcher::observe(&container, move |next| {
                            if width.changed(next) {
                                resplit();
                            }
                        });
                    }
                });
            }

            move || {
                liveness.revoke();
                watcher.borrow_mut().take();
                guard.borrow_mut().revert();
            }
        });
    }

    SplitTextHandle {
        node,
        status: (*status).clone(),
    }
}

thread_local! {
    static PREFETCHED: RefCell<PrefetchRegistry> = RefCell::new(PrefetchRegistry::new());
}

fn inject_prefetch(url: &str) -> Option<()> {
    let document = document()?;
    let link = document.create_element("link").ok()?;
    link.set_attribute("rel", "prefetch").ok()?;
    link.set_attribute("href", url).ok()?;
    document.head()?.append_child(&link).ok()?;
    Some(())
}

#[hook]
pub fn use_prefetch_on_visible(href: AttrValue) -> NodeRef {
    let handle = use_in_view(
        ObserverOptions::default()
            .with_root_margin(PREFETCH_ROOT_MARGIN)
            .once(),
    );
    let visible = handle.in_view();

    use_effect_with((visible, href), |(visible, href)| {
        if *visible {
            let claimed = page_url().and_then(|page| {
                PREFETCHED.with(|registry| registry.borrow_mut().claim(href, &page))
            });
            if let Some(url) = claimed {
                if inject_prefetch(&url).is_some() {
                    log_event(
                        LogLevel::Debug,
                        "prefetch_injected",
                        serde_json::json!({ "url": url }),
                    );
                }
            }
        }
        || ()
    });

    handle.node
}

thread_local! {
    static VITALS: Reporter<BeaconSink> = Reporter::new(BeaconSink::new(VITALS_ENDPOINT));
}

pub fn report_web_vitals() {
    VITALS.with(|reporter| {
        reporter.subscribe_once(|| {
            observe_web_vitals(|metric| {
                let page = page_context();
                VITALS.with(|reporter| {
                    reporter.report(metric, &page);
                });
            });
        });
    });
}

#[hook]
pub fn use_report_web_vitals() {
    use_effect_with((), |_| {
        report_web_vitals();
        || ()
    });
}

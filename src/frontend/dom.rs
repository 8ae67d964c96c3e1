use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use gloo_net::http::Request;
use js_sys::{Array, Function, Object, Reflect};
use wasm_bindgen::{closure::Closure, prelude::*, JsCast, JsValue};
use wasm_bindgen_futures::{spawn_local, JsFuture};
use web_sys::{
    window, AddEventListenerOptions, Document, Element, EventTarget, HtmlElement,
    IntersectionObserver, IntersectionObserverEntry, IntersectionObserverInit, MediaQueryList,
    PerformanceEntry, PerformanceObserver, PerformanceObserverEntryList, ResizeObserver,
    ResizeObserverEntry,
};

use crate::device::{classify, TOUCH_MEDIA_QUERY};
use crate::engine::{EngineCell, EngineError, EngineFuture};
use crate::logging::{log_event, LogLevel};
use crate::observe::{Liveness, ObserverOptions, Rect, Release, Visibility, VisibilityLatch};
use crate::scroll::{MarkerLines, TriggerGeometry};
use crate::split::{group_lines, Granularity, LabelSnapshot, Revert, SplitPlan, Token};
use crate::vitals::{
    AnalyticsSink, Metric, MetricName, PageContext, SinkError, VitalsAccumulator, VitalsEvent,
};

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = performance, js_name = "now")]
    pub fn performance_now() -> f64;

    #[wasm_bindgen(js_name = "requestAnimationFrame")]
    fn request_animation_frame(callback: &JsValue) -> i32;

    #[wasm_bindgen(js_name = "cancelAnimationFrame")]
    fn cancel_animation_frame(id: i32);
}

pub fn document() -> Option<Document> {
    window()?.document()
}

pub fn viewport_size() -> (f64, f64) {
    let Some(win) = window() else {
        return (1280.0, 720.0);
    };

    let width = win
        .inner_width()
        .ok()
        .and_then(|value| value.as_f64())
        .unwrap_or(1280.0);
    let height = win
        .inner_height()
        .ok()
        .and_then(|value| value.as_f64())
        .unwrap_or(720.0);

    (width, height)
}

pub fn scroll_y() -> f64 {
    window()
        .and_then(|win| win.scroll_y().ok())
        .unwrap_or(0.0)
}

pub fn trigger_geometry(element: &Element) -> TriggerGeometry {
    let rect = element.get_bounding_client_rect();
    TriggerGeometry {
        element_top: rect.top() + scroll_y(),
        element_height: rect.height(),
        viewport_height: viewport_size().1,
    }
}

pub fn media_query(query: &str) -> Option<MediaQueryList> {
    window()?.match_media(query).ok().flatten()
}

pub fn is_touch() -> bool {
    media_query(TOUCH_MEDIA_QUERY)
        .map(|mq| mq.matches())
        .unwrap_or(false)
}

pub fn page_url() -> Option<String> {
    window()?.location().href().ok()
}

pub fn page_context() -> PageContext {
    let path = window()
        .and_then(|win| win.location().pathname().ok())
        .unwrap_or_else(|| "/".to_string());
    let referrer = document()
        .map(|doc| doc.referrer())
        .filter(|referrer| !referrer.is_empty());

    PageContext {
        path,
        referrer,
        viewport: classify(viewport_size().0, is_touch()).label().to_string(),
    }
}

fn describe_js_error(value: &JsValue) -> String {
    value
        .as_string()
        .or_else(|| {
            Reflect::get(value, &JsValue::from_str("message"))
                .ok()
                .and_then(|message| message.as_string())
        })
        .unwrap_or_else(|| "unknown error".to_string())
}

/// Builds a plain options object; the typed web-sys dictionaries have
/// changed their setter names between releases.
fn options_object(entries: &[(&str, JsValue)]) -> Object {
    let object = Object::new();
    for (key, value) in entries {
        let _ = Reflect::set(&object, &JsValue::from_str(key), value);
    }
    object
}

type RafClosure = Closure<dyn FnMut(f64)>;

pub struct RafLoop {
    inner: Rc<RafInner>,
}

struct RafInner {
    closure: RefCell<Option<RafClosure>>,
    callback: RefCell<Box<dyn FnMut(f64) -> bool>>,
    running: Cell<bool>,
    raf_id: Cell<i32>,
}

impl RafLoop {
    pub fn new(callback: impl FnMut(f64) -> bool + 'static) -> Self {
        let inner = Rc::new(RafInner {
            closure: RefCell::new(None),
            callback: RefCell::new(Box::new(callback)),
            running: Cell::new(false),
            raf_id: Cell::new(0),
        });

        let weak: Weak<RafInner> = Rc::downgrade(&inner);
        let closure = Closure::<dyn FnMut(f64)>::new(move |timestamp_ms: f64| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.running.get() {
                return;
            }

            let wants_more = {
                let mut callback = inner.callback.borrow_mut();
                (*callback)(timestamp_ms)
            };

            if wants_more && inner.running.get() {
                if let Some(closure) = inner.closure.borrow().as_ref() {
                    inner.raf_id.set(request_animation_frame(closure.as_ref()));
                }
            } else {
                inner.running.set(false);
            }
        });
        *inner.closure.borrow_mut() = Some(closure);

        Self { inner }
    }

    pub fn start(&self) {
        if self.inner.running.replace(true) {
            return;
        }
        if let Some(closure) = self.inner.closure.borrow().as_ref() {
            self.inner
                .raf_id
                .set(request_animation_frame(closure.as_ref()));
        }
    }

    pub fn stop(&self) {
        if !self.inner.running.replace(false) {
            return;
        }
        cancel_animation_frame(self.inner.raf_id.get());
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }
}

impl Drop for RafLoop {
    fn drop(&mut self) {
        self.stop();
        self.inner.closure.borrow_mut().take();
    }
}

type EntriesClosure<O> = Closure<dyn FnMut(Array, O)>;

pub struct VisibilityObserver {
    observer: IntersectionObserver,
    _callback: EntriesClosure<IntersectionObserver>,
}

impl VisibilityObserver {
    pub fn observe(
        element: &Element,
        options: &ObserverOptions,
        liveness: Liveness,
        mut on_change: impl FnMut(Visibility) + 'static,
    ) -> Option<Self> {
        let options = options.normalized();
        let mut latch = VisibilityLatch::new(options.once);

        let callback = Closure::<dyn FnMut(Array, IntersectionObserver)>::new(
            move |entries: Array, observer: IntersectionObserver| {
                if !liveness.is_live() {
                    return;
                }
                let Some(entry) = entries
                    .iter()
                    .last()
                    .and_then(|value| value.dyn_into::<IntersectionObserverEntry>().ok())
                else {
                    return;
                };

                if let Some(visibility) = latch.accept(visibility_from_entry(&entry)) {
                    on_change(visibility);
                }
                if latch.is_latched() {
                    observer.disconnect();
                }
            },
        );

        let thresholds: Array = options
            .thresholds
            .iter()
            .map(|threshold| JsValue::from_f64(*threshold))
            .collect();
        let init = options_object(&[
            ("rootMargin", JsValue::from_str(&options.root_margin)),
            ("threshold", thresholds.into()),
        ]);

        let observer = IntersectionObserver::new_with_options(
            callback.as_ref().unchecked_ref(),
            init.unchecked_ref::<IntersectionObserverInit>(),
        )
        .ok()?;
        observer.observe(element);

        Some(Self {
            observer,
            _callback: callback,
        })
    }
}

impl Release for VisibilityObserver {
    fn release(self) {
        self.observer.disconnect();
    }
}

fn visibility_from_entry(entry: &IntersectionObserverEntry) -> Visibility {
    let bounds = entry.bounding_client_rect();
    Visibility {
        is_intersecting: entry.is_intersecting(),
        ratio: entry.intersection_ratio(),
        bounds: Rect {
            x: bounds.x(),
            y: bounds.y(),
            width: bounds.width(),
            height: bounds.height(),
        },
    }
}

pub struct ResizeWatcher {
    observer: ResizeObserver,
    _callback: EntriesClosure<ResizeObserver>,
}

impl ResizeWatcher {
    pub fn observe(element: &Element, mut on_resize: impl FnMut(f64) + 'static) -> Option<Self> {
        let callback = Closure::<dyn FnMut(Array, ResizeObserver)>::new(
            move |entries: Array, _observer: ResizeObserver| {
                if let Some(entry) = entries
                    .iter()
                    .last()
                    .and_then(|value| value.dyn_into::<ResizeObserverEntry>().ok())
                {
                    on_resize(entry.content_rect().width());
                }
            },
        );

        let observer = ResizeObserver::new(callback.as_ref().unchecked_ref()).ok()?;
        observer.observe(element);

        Some(Self {
            observer,
            _callback: callback,
        })
    }
}

impl Release for ResizeWatcher {
    fn release(self) {
        self.observer.disconnect();
    }
}

impl Drop for ResizeWatcher {
    fn drop(&mut self) {
        self.observer.disconnect();
    }
}

pub struct ListenerGuard {
    target: EventTarget,
    event: &'static str,
    callback: Closure<dyn FnMut()>,
}

impl ListenerGuard {
    pub fn passive(
        target: &EventTarget,
        event: &'static str,
        handler: impl FnMut() + 'static,
    ) -> Option<Self> {
        let callback = Closure::<dyn FnMut()>::new(handler);
        let options = options_object(&[("passive", JsValue::TRUE)]);

        target
            .add_event_listener_with_callback_and_add_event_listener_options(
                event,
                callback.as_ref().unchecked_ref(),
                options.unchecked_ref::<AddEventListenerOptions>(),
            )
            .ok()?;

        Some(Self {
            target: target.clone(),
            event,
            callback,
        })
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        let _ = self.target.remove_event_listener_with_callback(
            self.event,
            self.callback.as_ref().unchecked_ref(),
        );
    }
}

pub struct ScrollMarkers {
    start_element: HtmlElement,
    end_element: HtmlElement,
    start_viewport: HtmlElement,
    end_viewport: HtmlElement,
}

impl ScrollMarkers {
    pub fn create() -> Option<Self> {
        let body = document()?.body()?;
        let make = |label: &str, color: &str, position: &str| -> Option<HtmlElement> {
            let marker: HtmlElement = document()?.create_element("div").ok()?.dyn_into().ok()?;
            marker.set_text_content(Some(label));
            let _ = marker.set_attribute("aria-hidden", "true");
            let _ = marker.set_attribute("class", "scroll-marker");
            let style = marker.style();
            let _ = style.set_property("position", position);
            let _ = style.set_property("right", "0");
            let _ = style.set_property("z-index", "9999");
            let _ = style.set_property("pointer-events", "none");
            let _ = style.set_property("font", "12px/1 monospace");
            let _ = style.set_property("color", color);
            let _ = style.set_property("border-top", &format!("1px solid {color}"));
            let _ = style.set_property("padding", "2px 6px");
            body.append_child(&marker).ok()?;
            Some(marker)
        };

        Some(Self {
            start_element: make("start", "#2f9e44", "absolute")?,
            end_element: make("end", "#e03131", "absolute")?,
            start_viewport: make("scroller-start", "#2f9e44", "fixed")?,
            end_viewport: make("scroller-end", "#e03131", "fixed")?,
        })
    }

    pub fn place(&self, lines: MarkerLines) {
        for (marker, top) in [
            (&self.start_element, lines.start_element),
            (&self.end_element, lines.end_element),
            (&self.start_viewport, lines.start_viewport),
            (&self.end_viewport, lines.end_viewport),
        ] {
            let _ = marker.style().set_property("top", &format!("{top:.1}px"));
        }
    }
}

impl Drop for ScrollMarkers {
    fn drop(&mut self) {
        self.start_element.remove();
        self.end_element.remove();
        self.start_viewport.remove();
        self.end_viewport.remove();
    }
}

thread_local! {
    static TEXT_SPLITTER: EngineCell<TextSplitter> = const { EngineCell::new() };
}

pub fn load_text_splitter() -> EngineFuture<TextSplitter> {
    TEXT_SPLITTER.with(|cell| cell.load(load_splitter))
}

async fn load_splitter() -> Result<TextSplitter, EngineError> {
    let document = document().ok_or(EngineError::Unavailable("document"))?;

    // Line breaks depend on the final font metrics.
    let ready = document
        .fonts()
        .ready()
        .map_err(|error| EngineError::Load(describe_js_error(&error)))?;
    JsFuture::from(ready)
        .await
        .map_err(|error| EngineError::Load(describe_js_error(&error)))?;

    log_event(LogLevel::Debug, "text_splitter_ready", serde_json::json!({}));
    Ok(TextSplitter { document })
}

pub struct TextSplitter {
    document: Document,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SplitCounts {
    pub lines: usize,
    pub words: usize,
    pub chars: usize,
}

pub struct DomSplit {
    container: HtmlElement,
    label: LabelSnapshot,
    counts: SplitCounts,
}

impl DomSplit {
    pub fn counts(&self) -> SplitCounts {
        self.counts
    }
}

impl Revert for DomSplit {
    fn revert(self, original: &str) {
        self.container.set_text_content(Some(original));
        let _ = match self.label.restored() {
            Some(label) => self.container.set_attribute("aria-label", label),
            None => self.container.remove_attribute("aria-label"),
        };
    }
}

impl TextSplitter {
    pub fn split(
        &self,
        container: &HtmlElement,
        text: &str,
        granularity: Granularity,
    ) -> DomSplit {
        let plan = SplitPlan::build(text, granularity);
        let label = LabelSnapshot::capture(container.get_attribute("aria-label"));
        container.set_text_content(None);
        let _ = container.set_attribute("aria-label", text);

        let mut words = Vec::new();
        let mut chars = 0;

        for token in &plan.tokens {
            match token {
                Token::Space(space) => {
                    let _ = container.append_with_str_1(space);
                }
                Token::Word { text, chars: graphemes } => {
                    let parent: Element = if granularity.wraps_words() {
                        match self.wrapper("split-word") {
                            Some(word) => {
                                let _ = container.append_child(&word);
                                words.push(word.clone());
                                word.into()
                            }
                            None => container.clone().into(),
                        }
                    } else {
                        container.clone().into()
                    };

                    if granularity.chars {
                        for grapheme in graphemes {
                            match self.wrapper("split-char") {
                                Some(char_span) => {
                                    char_span.set_text_content(Some(grapheme.as_str()));
                                    let _ = parent.append_child(&char_span);
                                    chars += 1;
                                }
                                None => {
                                    let _ = parent.append_with_str_1(grapheme);
                                }
                            }
                        }
                    } else {
                        let _ = parent.append_with_str_1(text);
                    }
                }
            }
        }

        let lines = if granularity.lines {
            self.wrap_lines(container, &words)
        } else {
            0
        };

        DomSplit {
            container: container.clone(),
            label,
            counts: SplitCounts {
                lines,
                words: if granularity.words { words.len() } else { 0 },
                chars,
            },
        }
    }

    fn wrapper(&self, class_name: &str) -> Option<HtmlElement> {
        let element: HtmlElement = self.document.create_element("span").ok()?.dyn_into().ok()?;
        let _ = element.set_attribute("class", class_name);
        let _ = element.set_attribute("aria-hidden", "true");
        let _ = element.style().set_property("display", "inline-block");
        Some(element)
    }

    fn wrap_lines(&self, container: &HtmlElement, words: &[HtmlElement]) -> usize {
        let tops: Vec<f64> = words.iter().map(|word| f64::from(word.offset_top())).collect();
        let lines = group_lines(&tops);

        for range in &lines {
            let (Some(first), Some(last)) = (words.get(range.start), words.get(range.end - 1))
            else {
                continue;
            };
            let Ok(line) = self.document.create_element("div") else {
                continue;
            };
            let _ = line.set_attribute("class", "split-line");
            let _ = line.set_attribute("aria-hidden", "true");
            let first_node: &web_sys::Node = first;
            if container.insert_before(&line, Some(first_node)).is_err() {
                continue;
            }

            let last_node: &web_sys::Node = last;
            while let Some(node) = line.next_sibling() {
                let reached_last = node.is_same_node(Some(last_node));
                let _ = line.append_child(&node);
                if reached_last {
                    break;
                }
            }
        }

        lines.len()
    }
}

/// Hands vitals events to `navigator.sendBeacon`, which outlives page
/// unload. Falls back to a plain POST when the beacon is refused.
pub struct BeaconSink {
    endpoint: &'static str,
}

impl BeaconSink {
    pub fn new(endpoint: &'static str) -> Self {
        Self { endpoint }
    }
}

impl AnalyticsSink for BeaconSink {
    fn deliver(&self, event: &VitalsEvent) -> Result<(), SinkError> {
        let body = serde_json::to_string(event)?;
        if send_beacon(self.endpoint, &body) {
            return Ok(());
        }

        let endpoint = self.endpoint;
        let metric = event.metric.name;

        spawn_local(async move {
            let request = match Request::post(endpoint)
                .header("Content-Type", "application/json")
                .body(body)
            {
                Ok(request) => request,
                Err(error) => {
                    log_vitals_delivery_failure(metric, &error.to_string());
                    return;
                }
            };

            match request.send().await {
                Ok(response) if response.ok() => {}
                Ok(response) => {
                    log_vitals_delivery_failure(metric, &format!("status {}", response.status()))
                }
                Err(error) => log_vitals_delivery_failure(metric, &error.to_string()),
            }
        });
        Ok(())
    }
}

fn send_beacon(endpoint: &str, body: &str) -> bool {
    window()
        .and_then(|win| win.navigator().send_beacon_with_opt_str(endpoint, Some(body)).ok())
        .unwrap_or(false)
}

fn log_vitals_delivery_failure(metric: MetricName, message: &str) {
    log_event(
        LogLevel::Warn,
        "vitals_delivery_failed",
        serde_json::json!({ "metric": metric.as_str(), "message": message }),
    );
}

type PerformanceClosure = Closure<dyn FnMut(PerformanceObserverEntryList, PerformanceObserver)>;

fn observe_performance(
    entry_type: &str,
    extra: &[(&str, JsValue)],
    mut on_entry: impl FnMut(&PerformanceEntry) + 'static,
) -> bool {
    let callback: PerformanceClosure = Closure::new(
        move |list: PerformanceObserverEntryList, _observer: PerformanceObserver| {
            for value in list.get_entries().iter() {
                if let Ok(entry) = value.dyn_into::<PerformanceEntry>() {
                    on_entry(&entry);
                }
            }
        },
    );

    let Ok(observer) = PerformanceObserver::new(callback.as_ref().unchecked_ref()) else {
        return false;
    };

    let mut entries = vec![
        ("type", JsValue::from_str(entry_type)),
        ("buffered", JsValue::TRUE),
    ];
    entries.extend(extra.iter().cloned());
    let init = options_object(&entries);

    let observer_js: &JsValue = observer.as_ref();
    let observed = Reflect::get(observer_js, &JsValue::from_str("observe"))
        .ok()
        .and_then(|observe| observe.dyn_into::<Function>().ok())
        .map(|observe| observe.call1(observer_js, &init).is_ok())
        .unwrap_or(false);

    if observed {
        // Vitals observers live as long as the page.
        callback.forget();
    } else {
        log_event(
            LogLevel::Debug,
            "performance_entry_type_unsupported",
            serde_json::json!({ "entry_type": entry_type }),
        );
    }
    observed
}

fn entry_number(entry: &PerformanceEntry, key: &str) -> Option<f64> {
    Reflect::get(entry, &JsValue::from_str(key))
        .ok()
        .and_then(|value| value.as_f64())
}

fn metric_id(suffix: &str) -> String {
    format!("v1-{}-{suffix}", js_sys::Date::now() as u64)
}

fn navigation_entry() -> Option<JsValue> {
    let entries = window()?.performance()?.get_entries_by_type("navigation");
    let entry = entries.get(0);
    (!entry.is_undefined()).then_some(entry)
}

/// Wires PerformanceObservers for the five vitals. FCP and TTFB report as
/// soon as they are known; LCP, CLS and INP report when the page is hidden.
pub fn observe_web_vitals(on_metric: impl Fn(Metric) + 'static) {
    let on_metric = Rc::new(on_metric);
    let accumulator = Rc::new(RefCell::new(VitalsAccumulator::new()));
    let navigation_type = navigation_entry().and_then(|entry| {
        Reflect::get(&entry, &JsValue::from_str("type"))
            .ok()
            .and_then(|value| value.as_string())
    });
    let tag = {
        let navigation_type = navigation_type.clone();
        move |mut metric: Metric| {
            metric.navigation_type = navigation_type.clone();
            metric
        }
    };

    if let Some(response_start) = navigation_entry()
        .and_then(|entry| Reflect::get(&entry, &JsValue::from_str("responseStart")).ok())
        .and_then(|value| value.as_f64())
        .filter(|value| *value > 0.0)
    {
        on_metric(tag(Metric::new(
            MetricName::TimeToFirstByte,
            response_start,
            metric_id("ttfb"),
        )));
    }

    {
        let on_metric = on_metric.clone();
        let tag = tag.clone();
        let mut reported = false;
        observe_performance("paint", &[], move |entry| {
            if reported || entry.name() != "first-contentful-paint" {
                return;
            }
            reported = true;
            on_metric(tag(Metric::new(
                MetricName::FirstContentfulPaint,
                entry.start_time(),
                metric_id("fcp"),
            )));
        });
    }

    {
        let accumulator = accumulator.clone();
        observe_performance("largest-contentful-paint", &[], move |entry| {
            accumulator.borrow_mut().record_largest_paint(entry.start_time());
        });
    }

    {
        let accumulator = accumulator.clone();
        observe_performance("layout-shift", &[], move |entry| {
            let had_recent_input = Reflect::get(entry, &JsValue::from_str("hadRecentInput"))
                .ok()
                .and_then(|value| value.as_bool())
                .unwrap_or(false);
            if let Some(value) = entry_number(entry, "value") {
                accumulator
                    .borrow_mut()
                    .record_layout_shift(entry.start_time(), value, had_recent_input);
            }
        });
    }

    {
        let accumulator = accumulator.clone();
        observe_performance(
            "event",
            &[("durationThreshold", JsValue::from_f64(40.0))],
            move |entry| {
                let interaction_id = entry_number(entry, "interactionId").unwrap_or(0.0);
                if interaction_id > 0.0 {
                    accumulator
                        .borrow_mut()
                        .record_interaction(interaction_id as u64, entry.duration());
                }
            },
        );
    }

    {
        let accumulator = accumulator.clone();
        observe_performance("first-input", &[], move |entry| {
            let mut accumulator = accumulator.borrow_mut();
            accumulator.record_first_input(entry.duration());
            if let Some(interaction_id) = entry_number(entry, "interactionId") {
                if interaction_id > 0.0 {
                    accumulator.record_interaction(interaction_id as u64, entry.duration());
                }
            }
        });
    }

    let Some(doc) = document() else {
        return;
    };
    let flush = {
        let doc = doc.clone();
        move || {
            if !doc.hidden() {
                return;
            }
            let id_prefix = metric_id("page");
            for metric in accumulator.borrow_mut().finalize(&id_prefix) {
                on_metric(tag(metric));
            }
        }
    };
    if let Some(listener) = ListenerGuard::passive(&doc, "visibilitychange", flush) {
        // Page-lifetime listener.
        std::mem::forget(listener);
    }
}

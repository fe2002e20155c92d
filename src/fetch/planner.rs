//! Decomposes a candle request into ISS page calls.
//!
//! A window with both bounds known yields its whole descriptor list up front.
//! Open-ended requests are planned lazily: each batch is emitted only after the
//! previous batch has been observed, so the total row count never has to be
//! known in advance.

use chrono::{Days, NaiveDate};

use crate::config::{CountWalkConfig, ISS_PAGE_SIZE};
use crate::error::Result;

use super::{FetchMode, FetchRequest, HistoryBounds, Interval, PageDescriptor, RawPage};

const MINUTES_PER_DAY: i64 = 1_440;

/// Incremental source of page descriptors driven by the pages already fetched.
pub trait PagePlan {
    /// Up to `limit` descriptors that are known to be needed given what was observed so far.
    fn next_batch(&mut self, limit: usize) -> Vec<PageDescriptor>;

    fn observe(&mut self, descriptor: &PageDescriptor, page: &RawPage);

    fn is_exhausted(&self) -> bool;
}

pub struct RangePlanner {
    page_size: usize,
    walk: CountWalkConfig,
}

impl RangePlanner {
    pub fn new(page_size: usize, walk: CountWalkConfig) -> Self {
        Self {
            page_size: page_size.clamp(1, ISS_PAGE_SIZE),
            walk,
        }
    }

    /// Build a fresh plan; `today` anchors count requests without a `till_date`.
    pub fn plan(&self, request: &FetchRequest, today: NaiveDate) -> Result<Plan> {
        let plan = match request.mode()? {
            FetchMode::Range {
                from: Some(from),
                till: Some(till),
            } => Plan::Bounded(BoundedPlan::new(request, from, till, self.page_size)),
            FetchMode::Range { from, till } => {
                Plan::Forward(ForwardPlan::new(request, from, till, self.page_size))
            }
            FetchMode::Latest { count, till } => Plan::Backward(BackwardPlan::new(
                request,
                count,
                till.unwrap_or(today),
                self.page_size,
                self.walk,
            )),
        };
        Ok(plan)
    }
}

#[derive(Debug)]
pub enum Plan {
    Bounded(BoundedPlan),
    Forward(ForwardPlan),
    Backward(BackwardPlan),
}

impl PagePlan for Plan {
    fn next_batch(&mut self, limit: usize) -> Vec<PageDescriptor> {
        match self {
            Plan::Bounded(plan) => plan.next_batch(limit),
            Plan::Forward(plan) => plan.next_batch(limit),
            Plan::Backward(plan) => plan.next_batch(limit),
        }
    }

    fn observe(&mut self, descriptor: &PageDescriptor, page: &RawPage) {
        match self {
            Plan::Bounded(plan) => plan.observe(descriptor, page),
            Plan::Forward(plan) => plan.observe(descriptor, page),
            Plan::Backward(plan) => plan.observe(descriptor, page),
        }
    }

    fn is_exhausted(&self) -> bool {
        match self {
            Plan::Bounded(plan) => plan.is_exhausted(),
            Plan::Forward(plan) => plan.is_exhausted(),
            Plan::Backward(plan) => plan.is_exhausted(),
        }
    }
}

/// Explicit `[from, till]` window: offsets up to the most candles the window can hold.
#[derive(Debug)]
pub struct BoundedPlan {
    descriptors: Vec<PageDescriptor>,
    cursor: usize,
    final_offset: Option<usize>,
}

impl BoundedPlan {
    fn new(request: &FetchRequest, from: NaiveDate, till: NaiveDate, page_size: usize) -> Self {
        let rows = max_candles(request.interval, from, till);
        let pages = rows.div_ceil(page_size).max(1);

        let descriptors = (0..pages)
            .map(|index| PageDescriptor {
                security: request.security.clone(),
                interval: request.interval,
                offset: index * page_size,
                window_start: Some(from),
                window_end: Some(till),
            })
            .collect();

        Self {
            descriptors,
            cursor: 0,
            final_offset: None,
        }
    }

    pub fn descriptors(&self) -> &[PageDescriptor] {
        &self.descriptors
    }

    pub fn into_descriptors(self) -> Vec<PageDescriptor> {
        self.descriptors
    }
}

impl PagePlan for BoundedPlan {
    fn next_batch(&mut self, limit: usize) -> Vec<PageDescriptor> {
        if self.final_offset.is_some() {
            return Vec::new();
        }
        let end = (self.cursor + limit).min(self.descriptors.len());
        let batch = self.descriptors[self.cursor..end].to_vec();
        self.cursor = end;
        batch
    }

    fn observe(&mut self, descriptor: &PageDescriptor, page: &RawPage) {
        if page.is_final {
            let offset = self
                .final_offset
                .map_or(descriptor.offset, |seen| seen.min(descriptor.offset));
            self.final_offset = Some(offset);
        }
    }

    fn is_exhausted(&self) -> bool {
        self.final_offset.is_some() || self.cursor >= self.descriptors.len()
    }
}

/// Open-ended range walked forward by offset until a page comes back final.
#[derive(Debug)]
pub struct ForwardPlan {
    template: PageDescriptor,
    page_size: usize,
    next_offset: usize,
    finished: bool,
}

impl ForwardPlan {
    fn new(
        request: &FetchRequest,
        from: Option<NaiveDate>,
        till: Option<NaiveDate>,
        page_size: usize,
    ) -> Self {
        Self {
            template: PageDescriptor {
                security: request.security.clone(),
                interval: request.interval,
                offset: 0,
                window_start: from,
                window_end: till,
            },
            page_size,
            next_offset: 0,
            finished: false,
        }
    }
}

impl PagePlan for ForwardPlan {
    fn next_batch(&mut self, limit: usize) -> Vec<PageDescriptor> {
        if self.finished {
            return Vec::new();
        }

        (0..limit.max(1))
            .map(|_| {
                let descriptor = PageDescriptor {
                    offset: self.next_offset,
                    ..self.template.clone()
                };
                self.next_offset += self.page_size;
                descriptor
            })
            .collect()
    }

    fn observe(&mut self, _descriptor: &PageDescriptor, page: &RawPage) {
        if page.is_final {
            self.finished = true;
        }
    }

    fn is_exhausted(&self) -> bool {
        self.finished
    }
}

#[derive(Debug, Clone)]
struct Window {
    start: NaiveDate,
    end: NaiveDate,
    rows: usize,
    next_offset: usize,
    pending: bool,
    complete: bool,
}

impl Window {
    fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// Count mode: calendar windows walked backward from the anchor date.
///
/// Windows are kept newest first. A window that returns a full page is paged
/// forward inside its own bounds before it counts as complete. The walk ends
/// once the newest contiguous complete windows hold `count` rows or the history
/// floor is crossed. Without known history bounds a long enough run of empty
/// windows also ends it.
#[derive(Debug)]
pub struct BackwardPlan {
    security: String,
    interval: Interval,
    count: usize,
    page_size: usize,
    span_days: i64,
    walk: CountWalkConfig,
    cursor: Option<NaiveDate>,
    windows: Vec<Window>,
    bounded: bool,
}

impl BackwardPlan {
    fn new(
        request: &FetchRequest,
        count: usize,
        anchor: NaiveDate,
        page_size: usize,
        walk: CountWalkConfig,
    ) -> Self {
        Self {
            security: request.security.clone(),
            interval: request.interval,
            count,
            page_size,
            span_days: window_span_days(request.interval, page_size),
            walk,
            cursor: Some(anchor),
            windows: Vec::new(),
            bounded: false,
        }
    }

    pub fn span_days(&self) -> i64 {
        self.span_days
    }

    /// Restrict the walk to the dates ISS reports candles for.
    ///
    /// `None` means the interval has no candles at all. Once bounds are known the
    /// walk only ends at the first trading day, never on an empty gap.
    pub fn bound_history(&mut self, bounds: Option<HistoryBounds>) {
        match bounds {
            Some(bounds) => {
                self.walk.history_floor = self.walk.history_floor.max(bounds.first);
                self.cursor = self.cursor.map(|anchor| anchor.min(bounds.last));
                self.bounded = true;
            }
            None => self.cursor = None,
        }
    }

    fn descriptor(&self, window: &Window, offset: usize) -> PageDescriptor {
        PageDescriptor {
            security: self.security.clone(),
            interval: self.interval,
            offset,
            window_start: Some(window.start),
            window_end: Some(window.end),
        }
    }

    fn open_window(&mut self) -> Option<Window> {
        let end = self.cursor?;
        if end < self.walk.history_floor {
            self.cursor = None;
            return None;
        }

        let start = end
            .checked_sub_days(Days::new((self.span_days - 1) as u64))
            .unwrap_or(self.walk.history_floor)
            .max(self.walk.history_floor);
        self.cursor = start.pred_opt();

        Some(Window {
            start,
            end,
            rows: 0,
            next_offset: 0,
            pending: true,
            complete: false,
        })
    }

    fn satisfied(&self) -> bool {
        let mut total = 0;
        for window in &self.windows {
            if !window.complete {
                return false;
            }
            total += window.rows;
            if total >= self.count {
                return true;
            }
        }
        false
    }

    fn check_gap(&mut self) {
        if self.bounded {
            return;
        }
        let data_seen = self.windows.iter().any(|window| window.rows > 0);
        let empty_days: i64 = self
            .windows
            .iter()
            .rev()
            .take_while(|window| window.complete && window.rows == 0)
            .map(Window::days)
            .sum();

        let tolerated = if data_seen {
            self.walk.empty_gap_days
        } else {
            self.walk.leading_gap_days
        };

        if empty_days >= tolerated.max(2 * self.span_days) {
            self.cursor = None;
        }
    }
}

impl PagePlan for BackwardPlan {
    fn next_batch(&mut self, limit: usize) -> Vec<PageDescriptor> {
        if self.is_exhausted() {
            return Vec::new();
        }

        let limit = limit.max(1);
        let mut batch = Vec::new();

        for index in 0..self.windows.len() {
            if batch.len() >= limit {
                return batch;
            }
            let window = &self.windows[index];
            if window.complete || window.pending {
                continue;
            }
            batch.push(self.descriptor(window, window.next_offset));
            self.windows[index].pending = true;
        }

        while batch.len() < limit {
            let Some(window) = self.open_window() else {
                break;
            };
            batch.push(self.descriptor(&window, 0));
            self.windows.push(window);
        }

        batch
    }

    fn observe(&mut self, descriptor: &PageDescriptor, page: &RawPage) {
        let page_size = self.page_size;
        let Some(window) = self
            .windows
            .iter_mut()
            .find(|window| Some(window.start) == descriptor.window_start)
        else {
            return;
        };

        window.pending = false;
        window.rows += page.len();
        if page.is_final {
            window.complete = true;
        } else {
            window.next_offset = descriptor.offset + page_size;
        }

        self.check_gap();
    }

    fn is_exhausted(&self) -> bool {
        self.satisfied()
            || (self.cursor.is_none() && self.windows.iter().all(|window| window.complete))
    }
}

/// Most candles of `interval` that can start inside the inclusive date window.
fn max_candles(interval: Interval, from: NaiveDate, till: NaiveDate) -> usize {
    let days = (till - from).num_days() + 1;
    let minutes = days.max(0) * MINUTES_PER_DAY;
    (minutes / interval.min_minutes() + 1) as usize
}

/// Calendar days one backward window covers: roughly one page of round-the-clock candles.
fn window_span_days(interval: Interval, page_size: usize) -> i64 {
    let minutes = page_size as i64 * interval.minutes();
    ((minutes + MINUTES_PER_DAY - 1) / MINUTES_PER_DAY).max(1)
}

//! Dashboard view-model: filters, pagination, selection and chart settings
//! as one value, changed only through [`DashboardState::apply`].

use serde::{Deserialize, Serialize};

use crate::grid::GridRequest;

pub const DEFAULT_PER_PAGE: usize = 20;
pub const DEFAULT_WINDOW_MINUTES: u32 = 15;
pub const DEFAULT_PRE_ROLL_MINUTES: u32 = 5;
pub const WINDOW_CHOICES: [u32; 4] = [15, 30, 60, 120];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostFilters {
    pub year: Option<i32>,
    pub reply: bool,
    pub retweet: bool,
    pub quote: bool,
    pub query: String,
}

impl PostFilters {
    pub fn normalized(mut self) -> Self {
        self.query = self.query.trim().to_string();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartSettings {
    pub window_minutes: u32,
    pub pre_roll: bool,
    pub pre_roll_minutes: u32,
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            window_minutes: DEFAULT_WINDOW_MINUTES,
            pre_roll: false,
            pre_roll_minutes: DEFAULT_PRE_ROLL_MINUTES,
        }
    }
}

impl ChartSettings {
    pub fn pre_minutes(&self) -> u32 {
        if self.pre_roll {
            self.pre_roll_minutes
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardState {
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub filters: PostFilters,
    pub selected_post: Option<String>,
    pub overlay_posts: Vec<String>,
    pub chart: ChartSettings,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
            total: 0,
            filters: PostFilters::default(),
            selected_post: None,
            overlay_posts: Vec::new(),
            chart: ChartSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    NextPage,
    PrevPage,
    ApplyFilters(PostFilters),
    ClearFilters,
    ListLoaded { total: usize },
    SelectPost { post_id: String },
    SetWindow { minutes: u32 },
    SetPreRoll { enabled: bool },
    ToggleOverlay { post_id: String },
    ClearOverlay,
}

impl DashboardState {
    pub fn apply(mut self, event: ViewEvent) -> Self {
        match event {
            ViewEvent::NextPage => {
                if self.has_next() {
                    self.page = self.current_page() + 1;
                }
            }
            ViewEvent::PrevPage => {
                self.page = self.current_page().saturating_sub(1).max(1);
            }
            ViewEvent::ApplyFilters(filters) => {
                self.filters = filters.normalized();
                self.page = 1;
            }
            ViewEvent::ClearFilters => {
                self.filters = PostFilters::default();
                self.page = 1;
            }
            ViewEvent::ListLoaded { total } => {
                self.total = total;
                let last = self.last_page();
                if self.page > last {
                    self.page = last;
                }
            }
            ViewEvent::SelectPost { post_id } => {
                self.selected_post = Some(post_id);
            }
            ViewEvent::SetWindow { minutes } => {
                if WINDOW_CHOICES.contains(&minutes) {
                    self.chart.window_minutes = minutes;
                }
            }
            ViewEvent::SetPreRoll { enabled } => {
                self.chart.pre_roll = enabled;
            }
            ViewEvent::ToggleOverlay { post_id } => {
                if let Some(pos) = self.overlay_posts.iter().position(|id| *id == post_id) {
                    self.overlay_posts.remove(pos);
                } else {
                    self.overlay_posts.push(post_id);
                }
            }
            ViewEvent::ClearOverlay => {
                self.overlay_posts.clear();
            }
        }
        self
    }

    /// `per_page == 0` puts every post on one page.
    fn page_size(&self) -> usize {
        if self.per_page == 0 {
            self.total.max(1)
        } else {
            self.per_page
        }
    }

    pub fn last_page(&self) -> usize {
        if self.total == 0 {
            1
        } else {
            self.total.div_ceil(self.page_size())
        }
    }

    /// `page` clamped to `1..=last_page`; the fields are public and may be
    /// set out of range.
    pub fn current_page(&self) -> usize {
        self.page.clamp(1, self.last_page())
    }

    pub fn has_prev(&self) -> bool {
        self.current_page() > 1
    }

    pub fn has_next(&self) -> bool {
        self.current_page() < self.last_page()
    }

    /// "21-40 of 95", or "0" for an empty list.
    pub fn page_label(&self) -> String {
        if self.total == 0 {
            return "0".to_string();
        }
        let size = self.page_size();
        let page = self.current_page();
        let start = (page - 1) * size + 1;
        let end = page.saturating_mul(size).min(self.total);
        format!("{start}-{end} of {}", self.total)
    }

    /// Query parameters for the posts list collaborator.
    pub fn list_query(&self) -> Vec<(&'static str, String)> {
        let flag = |on: bool| (if on { "1" } else { "0" }).to_string();
        vec![
            ("page", self.current_page().to_string()),
            ("per_page", self.per_page.to_string()),
            (
                "year",
                self.filters
                    .year
                    .map(|year| year.to_string())
                    .unwrap_or_else(|| "all".to_string()),
            ),
            ("reply", flag(self.filters.reply)),
            ("retweet", flag(self.filters.retweet)),
            ("quote", flag(self.filters.quote)),
            ("q", self.filters.query.clone()),
        ]
    }

    pub fn chart_request(&self, anchor_ts: i64) -> GridRequest {
        GridRequest::new(anchor_ts, self.chart.window_minutes, self.chart.pre_minutes())
    }
}

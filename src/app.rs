#![cfg(feature = "web")]
use crate::charts::{self, ChartKind};
use crate::config::Config;
use crate::graph::{self, GraphOptions};
use crate::loader::{LoadError, SalesCache};
use crate::login::{self, PasswordScheme, Session, SessionStore, current_session};
use crate::sales::{ResolvedFilter, SalesFilter, SalesRecord, SalesTable, Summary};
use crate::store::{JsonUserStore, MemoryUserStore, UserStore};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::{CookieJar, Query};
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub scheme: PasswordScheme,
    pub sessions: SessionStore,
    pub sales: SalesCache,
    pub graph: GraphOptions,
    pub templates: Handlebars<'static>,
}

impl AppState {
    /// Build the state from its parts, registering the page templates
    ///
    /// # Errors
    /// * Returns an error if a bundled template fails to compile
    pub fn new(
        users: Arc<dyn UserStore>,
        scheme: PasswordScheme,
        sales: SalesCache,
        graph: GraphOptions,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let mut templates = Handlebars::new();
        templates.register_template_string("auth", include_str!("./static/auth.hbs"))?;
        templates.register_template_string("dashboard", include_str!("./static/dashboard.hbs"))?;

        Ok(Self {
            users,
            scheme,
            sessions: SessionStore::new(),
            sales,
            graph,
            templates,
        })
    }

    /// Build the state described by a configuration
    ///
    /// # Errors
    /// * Returns an error if the user database cannot be opened
    pub fn from_config(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let users: Arc<dyn UserStore> = if config.ephemeral {
            log::info!("keeping users in memory only");
            Arc::new(MemoryUserStore::new())
        } else {
            let store = JsonUserStore::open(&config.users_db)?;
            log::info!("user database at {}", store.path().display());
            Arc::new(store)
        };

        Self::new(
            users,
            config.password_scheme(),
            SalesCache::new(&config.sales_csv),
            GraphOptions {
                width: config.chart_width,
                height: config.chart_height,
            },
        )
    }
}

/// Filter query accepted by the dashboard and the API
///
/// `countries` repeats once per selected country; values are taken verbatim
/// since country names may contain commas. `applied` is set by the
/// dashboard form so that an empty selection means "no countries" rather
/// than "all countries".
#[derive(Debug, Default, Deserialize)]
pub struct FilterQuery {
    #[serde(default)]
    pub countries: Vec<String>,
    pub from: Option<i32>,
    pub to: Option<i32>,
    pub applied: Option<String>,
}

impl FilterQuery {
    pub fn to_filter(&self) -> SalesFilter {
        let countries = if self.applied.is_some() || !self.countries.is_empty() {
            Some(self.countries.clone())
        } else {
            None
        };
        SalesFilter {
            countries,
            from: self.from,
            to: self.to,
        }
    }
}

/// Query string reproducing a resolved filter, for chart image links
fn filter_query_string(filter: &ResolvedFilter) -> String {
    let mut parts: Vec<String> = filter
        .countries
        .iter()
        .map(|c| format!("countries={}", urlencoding::encode(c)))
        .collect();
    parts.push(format!("from={}", filter.from));
    parts.push(format!("to={}", filter.to));
    parts.push("applied=1".to_string());
    parts.join("&")
}

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(serve_index))
        .route("/login", get(login::serve_login_page).post(login::handle_login))
        .route("/signup", post(login::handle_signup))
        .route("/logout", post(login::handle_logout))
        .route("/dashboard", get(serve_dashboard))
        .route("/api/summary", get(get_summary))
        .route("/api/charts/:chart", get(get_chart))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the web server and serve until it stops
///
/// # Errors
/// * Returns an error if the state cannot be built or the address cannot be bound
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(AppState::from_config(&config)?);
    let app = router(state);

    let listener = TcpListener::bind(config.bind).await?;
    log::info!("Listening on http://{}", config.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct AuthView {
    message: Option<String>,
    is_error: bool,
}

/// Render the login / signup page with an optional inline message
///
/// `Ok` messages are shown as success, `Err` messages as errors.
pub fn render_auth_page(
    state: &AppState,
    status: StatusCode,
    message: Option<Result<String, String>>,
) -> Response {
    let view = match message {
        Some(Ok(m)) => AuthView {
            message: Some(m),
            is_error: false,
        },
        Some(Err(m)) => AuthView {
            message: Some(m),
            is_error: true,
        },
        None => AuthView {
            message: None,
            is_error: false,
        },
    };

    match state.templates.render("auth", &view) {
        Ok(page) => (status, Html(page)).into_response(),
        Err(e) => {
            log::error!("auth template failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "template error").into_response()
        }
    }
}

async fn serve_index(State(state): State<Arc<AppState>>, jar: CookieJar) -> Redirect {
    if current_session(&state, &jar).is_some() {
        Redirect::to("/dashboard")
    } else {
        Redirect::to("/login")
    }
}

#[derive(Serialize)]
struct CountryOption {
    name: String,
    selected: bool,
}

#[derive(Serialize)]
struct Kpis {
    total_companies: usize,
    total_profits: String,
    total_revenue: String,
    average_branches: String,
}

#[derive(Serialize)]
struct TabView {
    slug: &'static str,
    label: &'static str,
    image_url: String,
    data_url: String,
}

#[derive(Serialize)]
struct DashboardView {
    username: String,
    error: Option<String>,
    countries: Vec<CountryOption>,
    year_min: i32,
    year_max: i32,
    from: i32,
    to: i32,
    row_count: usize,
    kpis: Option<Kpis>,
    tabs: Vec<TabView>,
}

impl DashboardView {
    fn failed(session: &Session, error: String) -> Self {
        Self {
            username: session.username.clone(),
            error: Some(error),
            countries: Vec::new(),
            year_min: 0,
            year_max: 0,
            from: 0,
            to: 0,
            row_count: 0,
            kpis: None,
            tabs: Vec::new(),
        }
    }

    fn build(session: &Session, table: &SalesTable, filter: &ResolvedFilter) -> Self {
        let rows = filter.apply(table);
        let summary = Summary::compute(&rows);
        let (year_min, year_max) = table.year_bounds().unwrap_or((filter.from, filter.to));
        let query = filter_query_string(filter);

        Self {
            username: session.username.clone(),
            error: None,
            countries: table
                .countries()
                .into_iter()
                .map(|name| CountryOption {
                    selected: filter.countries.contains(&name),
                    name,
                })
                .collect(),
            year_min,
            year_max,
            from: filter.from,
            to: filter.to,
            row_count: rows.len(),
            kpis: Some(Kpis {
                total_companies: summary.total_companies,
                total_profits: summary.profits_display(),
                total_revenue: summary.revenue_display(),
                average_branches: summary.average_branches_display(),
            }),
            tabs: ChartKind::ALL
                .into_iter()
                .map(|kind| TabView {
                    slug: kind.slug(),
                    label: kind.tab_label(),
                    image_url: format!("/api/charts/{}.png?{}", kind.slug(), query),
                    data_url: format!("/api/charts/{}?{}", kind.slug(), query),
                })
                .collect(),
        }
    }
}

// A table that loaded but has no rows is treated like a failed load
fn load_table(state: &AppState) -> Result<Arc<SalesTable>, LoadError> {
    let table = state.sales.get()?;
    if table.is_empty() {
        return Err(LoadError::Empty);
    }
    Ok(table)
}

/// Serve the dashboard
///
/// Every request reloads (through the cache), filters, summarises and links
/// the seven charts for the current filter.
async fn serve_dashboard(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<FilterQuery>,
) -> Response {
    let Some(session) = current_session(&state, &jar) else {
        return Redirect::to("/login").into_response();
    };

    let view = match load_table(&state) {
        Ok(table) => {
            let filter = query.to_filter().resolve(&table);
            DashboardView::build(&session, &table, &filter)
        }
        Err(e) => {
            log::warn!("sales data unavailable: {e}");
            DashboardView::failed(&session, e.to_string())
        }
    };

    match state.templates.render("dashboard", &view) {
        Ok(page) => Html(page).into_response(),
        Err(e) => {
            log::error!("dashboard template failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "template error").into_response()
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn json_error(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
        }),
    )
        .into_response()
}

fn load_error_response(e: LoadError) -> Response {
    let status = match e {
        LoadError::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };
    json_error(status, e)
}

#[derive(Serialize)]
struct SummaryResponse {
    filter: ResolvedFilter,
    rows: usize,
    summary: Summary,
}

/// Resolved filter and KPIs as JSON
async fn get_summary(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<FilterQuery>,
) -> Response {
    if current_session(&state, &jar).is_none() {
        return json_error(StatusCode::UNAUTHORIZED, "login required");
    }

    let table = match load_table(&state) {
        Ok(table) => table,
        Err(e) => return load_error_response(e),
    };

    let filter = query.to_filter().resolve(&table);
    let rows: Vec<&SalesRecord> = filter.apply(&table);
    let summary = Summary::compute(&rows);

    Json(SummaryResponse {
        rows: rows.len(),
        filter,
        summary,
    })
    .into_response()
}

/// A chart as a JSON spec, or as PNG when the name ends in `.png`
async fn get_chart(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(chart): Path<String>,
    Query(query): Query<FilterQuery>,
) -> Response {
    if current_session(&state, &jar).is_none() {
        return json_error(StatusCode::UNAUTHORIZED, "login required");
    }

    let (name, as_png) = match chart.strip_suffix(".png") {
        Some(name) => (name, true),
        None => (chart.as_str(), false),
    };
    let kind: ChartKind = match name.parse() {
        Ok(kind) => kind,
        Err(e) => return json_error(StatusCode::NOT_FOUND, e),
    };

    let table = match load_table(&state) {
        Ok(table) => table,
        Err(e) => return load_error_response(e),
    };

    let filter = query.to_filter().resolve(&table);
    let spec = charts::build(kind, &filter.apply(&table));

    if !as_png {
        return Json(spec).into_response();
    }

    let options = state.graph.clone();
    let rendered = tokio::task::spawn_blocking(move || {
        graph::render_png(&spec, &options).map_err(|e| e.to_string())
    })
    .await;

    match rendered {
        Ok(Ok(png)) => ([(header::CONTENT_TYPE, "image/png")], png).into_response(),
        Ok(Err(e)) => {
            log::error!("rendering {kind} failed: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
        Err(e) => {
            log::error!("render task for {kind} panicked: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "render task failed")
        }
    }
}

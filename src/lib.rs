/*!
# Wolfzy Sales Dashboard

A small web application that puts a sales-analytics dashboard behind a
username / password login, built in Rust.

## Overview

Visitors sign up or log in on a single form. Logged-in users reach a
dashboard that loads the company sales CSV, lets them filter by country and
by an inclusive year range, and shows four KPIs plus seven charts of the
filtered rows.

## Architecture

### Frontend Layer
- **Technologies**: HTML rendered from Handlebars templates, a few lines of JS for tabs
- **Key Components**:
  - Login / Signup form with inline success and error messages
  - Dashboard with filter sidebar, KPI cards and chart tabs

### Backend Layer
- **Technologies**: Rust, axum, plotters
- **Core Components**:
  - Credential hashing (Argon2, with SHA-256 digests still accepted)
  - User store keyed by username
  - Session registry behind an http-only cookie
  - CSV loader with an mtime-keyed cache
  - Filter, KPI summary and chart specification builders
  - PNG chart renderer

### Data Persistence Layer
- Users in a JSON document, written atomically
- Sales data read from CSV on demand

## Modules

- **login**: Password hashing, signup / login, sessions and the auth handlers
- **store**: User persistence (JSON file or in-memory)
- **loader**: CSV parsing and the reload cache
- **sales**: Records, filtering and KPI summary
- **charts**: The seven chart specifications
- **graph**: PNG rendering of chart specifications
- **config**: Command line / environment configuration
- **app**: Routing and page rendering

## REST API Endpoints

- `/login`, `/signup`, `/logout` - Authentication
- `/dashboard` - Filtered dashboard page
- `/api/summary` - Resolved filter and KPIs as JSON
- `/api/charts/{kind}` - Chart specification as JSON
- `/api/charts/{kind}.png` - Rendered chart
*/

pub mod charts;
pub mod config;
pub mod loader;
pub mod login;
pub mod sales;
pub mod store;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod graph;

/// Re-export the building blocks most callers need
pub use charts::{ChartKind, ChartSpec};
pub use config::Config;
pub use loader::{LoadError, SalesCache, load_sales};
pub use login::*;
pub use sales::*;
pub use store::*;

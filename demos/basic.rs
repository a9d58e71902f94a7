//! A small site with a public page, a form protected by CSRF and a members
//! page guarded by role.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic
//!
//! Try:
//!   curl -i -c jar -b jar http://localhost:3000/notes/new
//!   # copy csrf-name / csrf-value from the page, then:
//!   curl -i -c jar -b jar -X POST http://localhost:3000/notes \
//!        -d 'text=hello&csrf-name=...&csrf-value=...'
//!   curl -i -c jar -b jar -X POST http://localhost:3000/notes -d 'text=again'   # 403
//!   curl -i -b jar http://localhost:3000/members

use std::sync::Arc;

use http::StatusCode;
use tollgate::{App, Config, MemoryUsers, RequestContext, Response, RouteTable, Server};

const CONFIG: &str = r#"
[auth.provider]
login_uri = "/login"
roles = ["member", "admin"]

[auth.provider.role_permissions]
member = ["notes.read"]
admin = ["notes.read", "notes.delete"]
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let routes = RouteTable::new()
        .route("home",       "GET",           "/",             home)?
        .route("note.form",  "GET",           "/notes/new",    note_form)?
        .route("note.save",  "POST",          "/notes",        save_note)?
        .route("note.show",  ["GET", "HEAD"], "/notes/{id}[/{format}]", show_note)?
        .route("members",    "GET",           "/members",      members)?;

    let config = Config::from_toml_str(CONFIG)?;
    let server = Server::from_config(&config.server)?;
    let users = MemoryUsers::new()
        .with_user("1", [("email", "ana@example.com"), ("role", "admin")]);
    let app = App::new(config, routes, Arc::new(users))?;

    server.serve(app).await?;
    Ok(())
}

fn home(_ctx: &RequestContext) -> Response {
    Response::html(r#"<a href="/notes/new">write a note</a>"#)
}

// GET /notes/new: renders the CSRF pair issued for this request.
fn note_form(ctx: &RequestContext) -> Response {
    let name = ctx.text("csrf-name").unwrap_or_default();
    let value = ctx.text("csrf-value").unwrap_or_default();
    Response::html(format!(
        r#"<form method="post" action="/notes">
  <input name="text">
  <input type="hidden" name="csrf-name" value="{name}">
  <input type="hidden" name="csrf-value" value="{value}">
  <button>save</button>
</form>"#
    ))
}

// POST /notes: only reached with a valid, unused CSRF pair.
fn save_note(ctx: &RequestContext) -> Response {
    let text = ctx.request().field("text").unwrap_or_default();
    Response::builder()
        .status(StatusCode::CREATED)
        .header("location", "/notes/1")
        .text(format!("saved: {text}"))
}

// GET /notes/{id} and /notes/{id}/{format}
fn show_note(ctx: &RequestContext) -> String {
    let id = ctx.param("id").unwrap_or("?");
    match ctx.param("format") {
        Some("json") => format!(r#"{{"id":"{id}"}}"#),
        _ => format!("note {id}"),
    }
}

fn members(ctx: &RequestContext) -> Response {
    match ctx.user() {
        Some(user) if user.has_permission("notes.read") => {
            Response::text(format!("welcome, member {}", user.identity().id().unwrap_or_default()))
        }
        Some(user) => Response::redirect(&user.provider().login_uri),
        None => Response::status(StatusCode::UNAUTHORIZED),
    }
}

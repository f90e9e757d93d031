use std::convert::Infallible;
use std::sync::Arc;

use futures::{stream, StreamExt};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::reply::{self, Response};
use warp::sse::Event;
use warp::{Filter, Rejection, Reply};

use super::types::*;
use crate::change_capture::{ChangeCaptureFilter, ChangeCaptureStream};
use crate::controller::Controller;
use crate::error_handling::types::{ErrorStatus, ServiceError};
use crate::management::{FileChunks, FileToFetch};
use crate::traffic_recording::HistoryCursor;

/// Every route resolves to a plain response so groups can be unified and boxed.
pub type Route = BoxedFilter<(Response,)>;

const MAX_BODY_BYTES: u64 = 4 * 1024 * 1024;

pub fn respond<T: Serialize>(result: Result<T, ServiceError>) -> Response {
    match result {
        Ok(value) => reply::with_status(reply::json(&value), StatusCode::OK).into_response(),
        Err(err) => error_response(&err),
    }
}

pub fn error_response(err: &ServiceError) -> Response {
    debug!("Request failed: {}", err);
    reply::with_status(reply::json(&ApiError::from(err)), status_code(err.status()))
        .into_response()
}

fn with_controller(
    controller: &Arc<Controller>,
) -> impl Filter<Extract = (Arc<Controller>,), Error = Infallible> + Clone {
    let controller = Arc::clone(controller);
    warp::any().map(move || Arc::clone(&controller))
}

fn with_session() -> impl Filter<Extract = (Result<Uuid, ServiceError>,), Error = Rejection> + Clone
{
    warp::header::optional::<String>(SESSION_HEADER).map(parse_session_id)
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn sse_json<T: Serialize>(name: &str, value: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(value)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

/// POST /sessions/:mode, DELETE /sessions/:id
pub fn session_routes(controller: &Arc<Controller>) -> Route {
    let create = warp::path!("sessions" / String)
        .and(warp::post())
        .and(json_body())
        .and(with_controller(controller))
        .map(|mode: String, req: CreateSessionRequest, c: Arc<Controller>| {
            respond(
                session_mode(&mode).and_then(|mode| c.create_session(&req.catalog, mode, req.labels)),
            )
        });

    let terminate = warp::path!("sessions" / Uuid)
        .and(warp::delete())
        .and(with_controller(controller))
        .map(|id: Uuid, c: Arc<Controller>| respond(Ok(c.terminate_session(id))));

    create.or(terminate).unify().boxed()
}

/// Routes acting on the session named by the `x-session-id` header.
pub fn session_scoped_routes(controller: &Arc<Controller>) -> Route {
    let info = warp::path!("session")
        .and(warp::get())
        .and(with_session())
        .and(with_controller(controller))
        .map(|session: Result<Uuid, ServiceError>, c: Arc<Controller>| {
            respond(session.and_then(|id| c.session_info(id)))
        });

    let close = warp::path!("session" / "close")
        .and(warp::post())
        .and(with_session())
        .and(with_controller(controller))
        .map(|session: Result<Uuid, ServiceError>, c: Arc<Controller>| {
            respond(session.and_then(|id| c.close(id)))
        });

    let go_live = warp::path!("session" / "go-live-and-close")
        .and(warp::post())
        .and(with_session())
        .and(with_controller(controller))
        .map(|session: Result<Uuid, ServiceError>, c: Arc<Controller>| {
            respond(session.and_then(|id| c.go_live_and_close(id)))
        });

    let catalog_state = warp::path!("session" / "catalog-state")
        .and(warp::get())
        .and(with_session())
        .and(with_controller(controller))
        .map(|session: Result<Uuid, ServiceError>, c: Arc<Controller>| {
            respond(session.and_then(|id| c.session_catalog_state(id)))
        });

    let entity_types = warp::path!("session" / "entity-types")
        .and(warp::get())
        .and(with_session())
        .and(with_controller(controller))
        .map(|session: Result<Uuid, ServiceError>, c: Arc<Controller>| {
            respond(session.and_then(|id| c.all_entity_types(id)))
        });

    let open_transaction = warp::path!("session" / "transactions")
        .and(warp::post())
        .and(with_session())
        .and(with_controller(controller))
        .map(|session: Result<Uuid, ServiceError>, c: Arc<Controller>| {
            respond(session.and_then(|id| c.open_transaction(id)))
        });

    let close_transaction = warp::path!("session" / "transactions" / Uuid / "close")
        .and(warp::post())
        .and(with_session())
        .and(json_body())
        .and(with_controller(controller))
        .then(
            |transaction_id: Uuid,
             session: Result<Uuid, ServiceError>,
             req: CloseTransactionRequest,
             c: Arc<Controller>| async move {
                let result = match session {
                    Ok(id) => c.close_transaction(id, transaction_id, req.commit).await,
                    Err(e) => Err(e),
                };
                respond(result)
            },
        );

    let upsert = warp::path!("session" / "entities" / String)
        .and(warp::post())
        .and(with_session())
        .and(json_body())
        .and(with_controller(controller))
        .then(
            |entity_type: String,
             session: Result<Uuid, ServiceError>,
             req: UpsertEntityRequest,
             c: Arc<Controller>| async move {
                let result = match session {
                    Ok(id) => {
                        c.upsert_entity(id, &entity_type, req.primary_key, req.classifier, req.body)
                            .await
                    }
                    Err(e) => Err(e),
                };
                respond(result)
            },
        );

    let delete = warp::path!("session" / "entities" / String / i64)
        .and(warp::delete())
        .and(with_session())
        .and(with_controller(controller))
        .then(
            |entity_type: String,
             primary_key: i64,
             session: Result<Uuid, ServiceError>,
             c: Arc<Controller>| async move {
                let result = match session {
                    Ok(id) => c.delete_entity(id, &entity_type, primary_key).await,
                    Err(e) => Err(e),
                };
                respond(result)
            },
        );

    let subscribe = warp::path!("session" / "change-capture")
        .and(warp::post())
        .and(with_session())
        .and(json_body())
        .and(with_controller(controller))
        .map(
            |session: Result<Uuid, ServiceError>,
             filter: ChangeCaptureFilter,
             c: Arc<Controller>| {
                match session.and_then(|id| c.register_change_capture(id, filter)) {
                    Ok(stream) => change_capture_sse(stream),
                    Err(e) => error_response(&e),
                }
            },
        );

    let unsubscribe = warp::path!("session" / "change-capture" / Uuid)
        .and(warp::delete())
        .and(with_session())
        .and(with_controller(controller))
        .map(
            |subscription_id: Uuid, session: Result<Uuid, ServiceError>, c: Arc<Controller>| {
                respond(
                    session
                        .and_then(|id| c.unregister_change_capture(id, subscription_id))
                        .map(|unregistered| UnregisteredResponse { unregistered }),
                )
            },
        );

    info.or(close)
        .unify()
        .or(go_live)
        .unify()
        .or(catalog_state)
        .unify()
        .or(entity_types)
        .unify()
        .or(open_transaction)
        .unify()
        .or(close_transaction)
        .unify()
        .or(upsert)
        .unify()
        .or(delete)
        .unify()
        .or(subscribe)
        .unify()
        .or(unsubscribe)
        .unify()
        .boxed()
}

/// Streams change capture events. The first event announces the subscription, the last one
/// is either `end` or a terminal `error`.
fn change_capture_sse(stream: ChangeCaptureStream) -> Response {
    let announcement = SubscriptionAnnouncement {
        subscription_id: stream.id(),
        session_id: stream.session_id(),
        since_sequence: stream.since_sequence(),
    };
    let head = stream::once(async move { Ok::<Event, Infallible>(sse_json("subscribed", &announcement)) });
    let events = stream::unfold(Some(stream), |state| async move {
        let Some(mut stream) = state else {
            return None;
        };
        let last = match stream.next().await {
            Some(Ok(event)) => {
                return Some((Ok::<Event, Infallible>(sse_json("change", &event)), Some(stream)))
            }
            Some(Err(err)) => sse_json("error", &ApiError::from(&ServiceError::from(err))),
            None => Event::default().event("end").data("unsubscribed"),
        };
        Some((Ok(last), None))
    });
    warp::sse::reply(warp::sse::keep_alive().stream(head.chain(events))).into_response()
}

/// Streams a file chunk by chunk; a read failure aborts the body.
fn file_download(file: &FileToFetch, chunks: FileChunks) -> Response {
    reply::with_header(
        reply::with_header(
            reply::stream(chunks.into_stream()),
            "content-type",
            "application/octet-stream",
        ),
        "content-disposition",
        format!("attachment; filename=\"{}\"", file.name),
    )
    .into_response()
}

fn history_sse(cursor: HistoryCursor) -> Response {
    let records = stream::iter(cursor).map(|record| Ok::<Event, Infallible>(sse_json("record", &record)));
    let end = stream::once(async { Ok::<Event, Infallible>(Event::default().event("end").data("completed")) });
    warp::sse::reply(warp::sse::keep_alive().stream(records.chain(end))).into_response()
}

/// Catalog administration under /catalogs
pub fn catalog_routes(controller: &Arc<Controller>) -> Route {
    let names = warp::path!("catalogs")
        .and(warp::get())
        .and(with_controller(controller))
        .map(|c: Arc<Controller>| respond(Ok(c.catalog_names())));

    let define = warp::path!("catalogs")
        .and(warp::post())
        .and(json_body())
        .and(with_controller(controller))
        .map(|req: DefineCatalogRequest, c: Arc<Controller>| respond(c.define_catalog(&req.name)));

    let state = warp::path!("catalogs" / String / "state")
        .and(warp::get())
        .and(with_controller(controller))
        .map(|name: String, c: Arc<Controller>| respond(c.catalog_state(&name)));

    let delete = warp::path!("catalogs" / String)
        .and(warp::delete())
        .and(with_controller(controller))
        .map(|name: String, c: Arc<Controller>| {
            respond(Ok(DeletedResponse {
                deleted: c.delete_catalog_if_exists(&name),
            }))
        });

    let rename = warp::path!("catalogs" / String / "rename")
        .and(warp::post())
        .and(json_body())
        .and(with_controller(controller))
        .map(|name: String, req: RenameCatalogRequest, c: Arc<Controller>| {
            respond(c.rename_catalog(&name, &req.new_name))
        });

    let replace = warp::path!("catalogs" / "replace")
        .and(warp::post())
        .and(json_body())
        .and(with_controller(controller))
        .map(|req: ReplaceCatalogRequest, c: Arc<Controller>| {
            respond(c.replace_catalog(&req.to_be_replaced, &req.replaced_by))
        });

    let go_live = warp::path!("catalogs" / String / "go-live")
        .and(warp::post())
        .and(with_controller(controller))
        .map(|name: String, c: Arc<Controller>| respond(c.go_live(&name)));

    names
        .or(define)
        .unify()
        .or(replace)
        .unify()
        .or(state)
        .unify()
        .or(delete)
        .unify()
        .or(rename)
        .unify()
        .or(go_live)
        .unify()
        .boxed()
}

/// Traffic recording under /traffic
pub fn traffic_routes(controller: &Arc<Controller>) -> Route {
    let start = warp::path!("traffic" / "recording" / "start")
        .and(warp::post())
        .and(json_body())
        .and(with_controller(controller))
        .map(|req: StartRecordingRequest, c: Arc<Controller>| {
            respond(c.start_traffic_recording(req.criteria, req.settings))
        });

    let stop = warp::path!("traffic" / "recording" / "stop")
        .and(warp::post())
        .and(json_body())
        .and(with_controller(controller))
        .map(|req: StopRecordingRequest, c: Arc<Controller>| {
            respond(c.stop_traffic_recording(req.task_id))
        });

    let status = warp::path!("traffic" / "recording")
        .and(warp::get())
        .and(with_controller(controller))
        .map(|c: Arc<Controller>| respond(Ok(c.traffic_recording_status())));

    let history_list = warp::path!("traffic" / "history" / "list")
        .and(warp::post())
        .and(json_body())
        .and(with_controller(controller))
        .map(|req: HistoryRequest, c: Arc<Controller>| {
            let limit = req.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
            respond(Ok(c.traffic_history_list(&req.filter, limit, req.reversed)))
        });

    let history = warp::path!("traffic" / "history")
        .and(warp::post())
        .and(json_body())
        .and(with_controller(controller))
        .map(|req: HistoryRequest, c: Arc<Controller>| {
            if req.reversed {
                return error_response(&ServiceError::InvalidArgument(
                    "the history stream is chronological, use /traffic/history/list".into(),
                ));
            }
            history_sse(c.traffic_history(req.filter, req.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)))
        });

    let label_names = warp::path!("traffic" / "labels")
        .and(warp::get())
        .and(warp::query::<LabelQuery>())
        .and(with_controller(controller))
        .map(|q: LabelQuery, c: Arc<Controller>| {
            respond(Ok(c.traffic_label_names(
                q.prefix.as_deref(),
                q.top_n.unwrap_or(DEFAULT_TOP_N),
            )))
        });

    let label_values = warp::path!("traffic" / "labels" / String / "values")
        .and(warp::get())
        .and(warp::query::<LabelQuery>())
        .and(with_controller(controller))
        .map(|name: String, q: LabelQuery, c: Arc<Controller>| {
            respond(Ok(c.traffic_label_values(
                &name,
                q.prefix.as_deref(),
                q.top_n.unwrap_or(DEFAULT_TOP_N),
            )))
        });

    start
        .or(stop)
        .unify()
        .or(status)
        .unify()
        .or(history_list)
        .unify()
        .or(history)
        .unify()
        .or(label_names)
        .unify()
        .or(label_values)
        .unify()
        .boxed()
}

/// Server status, configuration, tasks and files
pub fn management_routes(controller: &Arc<Controller>) -> Route {
    let status = warp::path!("status")
        .and(warp::get())
        .and(with_controller(controller))
        .map(|c: Arc<Controller>| respond(Ok(c.server_status())));

    let configuration = warp::path!("configuration")
        .and(warp::get())
        .and(with_controller(controller))
        .map(|c: Arc<Controller>| respond(c.configuration()));

    let statistics = warp::path!("catalog-statistics")
        .and(warp::get())
        .and(with_controller(controller))
        .map(|c: Arc<Controller>| respond(Ok(c.catalog_statistics())));

    let keywords = warp::path!("reserved-keywords")
        .and(warp::get())
        .and(with_controller(controller))
        .map(|c: Arc<Controller>| respond(Ok(c.reserved_keywords())));

    let tasks = warp::path!("tasks")
        .and(warp::get())
        .and(warp::query::<TaskQuery>())
        .and(with_controller(controller))
        .map(|q: TaskQuery, c: Arc<Controller>| {
            respond(q.parse_states().and_then(|states| {
                c.list_task_statuses(
                    q.page.unwrap_or(1),
                    q.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
                    &states,
                )
            }))
        });

    let task = warp::path!("tasks" / Uuid)
        .and(warp::get())
        .and(with_controller(controller))
        .map(|id: Uuid, c: Arc<Controller>| respond(c.task_status(id)));

    let cancel_task = warp::path!("tasks" / Uuid / "cancel")
        .and(warp::post())
        .and(with_controller(controller))
        .map(|id: Uuid, c: Arc<Controller>| respond(c.cancel_task(id)));

    let files = warp::path!("files")
        .and(warp::get())
        .and(warp::query::<FileQuery>())
        .and(with_controller(controller))
        .map(|q: FileQuery, c: Arc<Controller>| {
            respond(c.list_files(
                q.page.unwrap_or(1),
                q.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
                q.origin.as_deref(),
            ))
        });

    let file = warp::path!("files" / Uuid)
        .and(warp::get())
        .and(with_controller(controller))
        .map(|id: Uuid, c: Arc<Controller>| respond(c.file(id)));

    let fetch = warp::path!("files" / Uuid / "content")
        .and(warp::get())
        .and(with_controller(controller))
        .map(|id: Uuid, c: Arc<Controller>| {
            match c.file(id).and_then(|file| Ok((file, c.fetch_file(id)?))) {
                Ok((file, chunks)) => file_download(&file, chunks),
                Err(e) => error_response(&e),
            }
        });

    let delete_file = warp::path!("files" / Uuid)
        .and(warp::delete())
        .and(with_controller(controller))
        .map(|id: Uuid, c: Arc<Controller>| respond(c.delete_file(id)));

    status
        .or(configuration)
        .unify()
        .or(statistics)
        .unify()
        .or(keywords)
        .unify()
        .or(tasks)
        .unify()
        .or(task)
        .unify()
        .or(cancel_task)
        .unify()
        .or(files)
        .unify()
        .or(file)
        .unify()
        .or(fetch)
        .unify()
        .or(delete_file)
        .unify()
        .boxed()
}

/// Every route of the API.
pub fn api(controller: &Arc<Controller>) -> Route {
    session_routes(controller)
        .or(session_scoped_routes(controller))
        .unify()
        .or(catalog_routes(controller))
        .unify()
        .or(traffic_routes(controller))
        .unify()
        .or(management_routes(controller))
        .unify()
        .boxed()
}

/// Turns rejections (unknown route, malformed body or query) into the API error payload.
pub async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (code, status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, ErrorStatus::NotFound, "No such route".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, ErrorStatus::InvalidArgument, e.to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, ErrorStatus::InvalidArgument, e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            ErrorStatus::InvalidArgument,
            "Request body too large".to_string(),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            ErrorStatus::InvalidArgument,
            "Method not allowed".to_string(),
        )
    } else {
        warn!("Unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorStatus::Internal,
            "Unhandled rejection".to_string(),
        )
    };
    Ok(reply::with_status(reply::json(&ApiError { status, message }), code).into_response())
}

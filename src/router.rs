use salvo::{Router, affix_state, cors::Cors, http::Method};

use crate::{
    AppState,
    api::{analyze, auth as auth_api, images, reports},
    auth::require_session,
};

pub fn build(state: AppState) -> Router {
    let cors = Cors::new()
        .allow_origin("*")
        .allow_methods(vec![
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::PUT,
            Method::OPTIONS,
        ])
        .allow_headers("*")
        .expose_headers("content-disposition")
        .max_age(3600)
        .into_handler();

    // /api/auth/* stays reachable without a session
    let auth = Router::with_path("api/auth")
        .push(Router::with_path("login").post(auth_api::login))
        .push(Router::with_path("logout").post(auth_api::logout));

    let image_routes = Router::with_path("images")
        // must precede {id}
        .push(Router::with_path("cleanup").delete(images::cleanup))
        .push(
            Router::with_path("{id}")
                .get(images::fetch)
                .post(images::upload)
                .put(images::upload)
                .delete(images::remove)
                .push(Router::with_path("metadata").get(images::metadata_info))
                .push(Router::with_path("annotated").post(images::annotate)),
        );

    let analyze_routes = Router::with_path("analyze").post(analyze::single).push(
        Router::with_path("batch").post(analyze::start_batch).push(
            Router::with_path("{job}")
                .get(analyze::batch_status)
                .push(Router::with_path("stop").post(analyze::stop_batch)),
        ),
    );

    let api = Router::with_path("api")
        .hoop(require_session)
        .push(image_routes)
        .push(Router::with_path("reports/{variant}").post(reports::generate))
        .push(analyze_routes);

    Router::new()
        .hoop(cors)
        .hoop(affix_state::inject(state))
        .push(auth)
        .push(api)
}

use rocket::{
    Request, Response,
    fairing::{Fairing, Info, Kind},
    http::{Header, Method, Status},
};
use std::io::Cursor;

/// Grants cross-origin access to one configured origin and answers preflights.
pub struct CorsFairing {
    allowed_origin: String,
}

impl CorsFairing {
    pub fn new(allowed_origin: impl Into<String>) -> Self {
        Self {
            allowed_origin: allowed_origin.into(),
        }
    }

    fn allows(&self, origin: Option<&str>) -> bool {
        origin.is_some_and(|origin| origin == self.allowed_origin)
    }
}

#[rocket::async_trait]
impl Fairing for CorsFairing {
    fn info(&self) -> Info {
        Info {
            name: "CORS",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        // No route handles OPTIONS; turn the resulting 404 into an empty 204.
        if request.method() == Method::Options && response.status() == Status::NotFound {
            response.set_status(Status::NoContent);
            response.set_sized_body(0, Cursor::new(""));
        }

        response.set_header(Header::new("Vary", "Origin"));

        if !self.allows(request.headers().get_one("Origin")) {
            return;
        }

        response.set_header(Header::new(
            "Access-Control-Allow-Origin",
            self.allowed_origin.clone(),
        ));
        response.set_header(Header::new("Access-Control-Allow-Credentials", "true"));
        response.set_header(Header::new(
            "Access-Control-Allow-Methods",
            "GET, POST, PUT, DELETE, OPTIONS",
        ));
        response.set_header(Header::new(
            "Access-Control-Allow-Headers",
            "Authorization, Content-Type",
        ));
    }
}

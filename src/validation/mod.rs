//! OpenAPI 3.x contract model.
//!
//! The document is parsed once, every operation's schemas are resolved and
//! compiled, and the result is a [`RouteTable`] the engine matches requests
//! against.

mod document;
mod operation;
mod router;
mod schema;

pub use document::OpenApiDocument;
pub use operation::{
    MediaType, Operation, ParamLocation, Parameter, RequestBodySpec, ResponseSpec, Responses,
    essence, find_media_type, is_json,
};
pub use router::{RouteMatch, RouteTable};
pub use schema::{CompiledSchema, SchemaResolver, SchemaViolation, join_violations};

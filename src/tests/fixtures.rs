use bytes::Bytes;
use parking_lot::Mutex;

use crate::shipper::LogSink;

/// A small users API exercising literal-vs-param routing, refs, nullable
/// fields, required bodies, and response ranges.
pub(crate) const USERS_SPEC: &str = r##"{
  "openapi": "3.0.3",
  "info": { "title": "Users", "version": "1.0.0" },
  "paths": {
    "/health": {
      "get": { "responses": { "200": { "description": "ok" } } }
    },
    "/users/{id}": {
      "parameters": [
        { "name": "id", "in": "path", "required": true, "schema": { "type": "integer" } }
      ],
      "get": {
        "responses": {
          "200": {
            "description": "user",
            "content": { "application/json": { "schema": { "$ref": "#/components/schemas/User" } } }
          },
          "404": {
            "description": "missing",
            "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Error" } } }
          }
        }
      },
      "delete": { "responses": { "204": { "description": "deleted" } } }
    },
    "/users/me": {
      "get": {
        "responses": {
          "200": {
            "description": "self",
            "content": { "application/json": { "schema": { "$ref": "#/components/schemas/User" } } }
          }
        }
      }
    },
    "/users": {
      "post": {
        "parameters": [
          { "name": "X-Tenant", "in": "header", "schema": { "type": "string" } },
          { "name": "dry_run", "in": "query", "schema": { "type": "boolean" } }
        ],
        "requestBody": {
          "required": true,
          "content": {
            "application/json": { "schema": { "$ref": "#/components/schemas/NewUser" } }
          }
        },
        "responses": {
          "201": {
            "description": "created",
            "content": { "application/json": { "schema": { "$ref": "#/components/schemas/User" } } }
          },
          "4XX": { "description": "client error" }
        }
      }
    }
  },
  "components": {
    "schemas": {
      "User": {
        "type": "object",
        "required": ["id"],
        "properties": {
          "id": { "type": "integer" },
          "nickname": { "type": "string", "nullable": true }
        }
      },
      "NewUser": {
        "type": "object",
        "required": ["name"],
        "additionalProperties": false,
        "properties": { "name": { "type": "string", "minLength": 1 } }
      },
      "Error": {
        "type": "object",
        "properties": { "message": { "type": "string" } }
      }
    }
  }
}
"##;

/// The same contract as [`USERS_SPEC`], trimmed to one route, in YAML.
pub(crate) const USERS_SPEC_YAML: &str = r#"openapi: 3.0.3
info:
  title: Users
  version: 1.0.0
servers:
  - url: https://api.example.com/v1
paths:
  /users/{id}:
    get:
      parameters:
        - name: id
          in: path
          required: true
          schema:
            type: integer
      responses:
        "200":
          description: user
"#;

/// Log sink that keeps every record in memory.
#[derive(Default)]
pub(crate) struct RecordingSink {
    records: Mutex<Vec<(Bytes, String)>>,
}

impl RecordingSink {
    pub(crate) fn records(&self) -> Vec<(Bytes, String)> {
        self.records.lock().clone()
    }
}

impl LogSink for RecordingSink {
    fn emit(&self, record: Bytes, api_key: &str) {
        self.records.lock().push((record, api_key.to_string()));
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

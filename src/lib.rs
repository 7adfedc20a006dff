/*!
# SmartCart Client Core

The stateful core of a retail "smart cart" client, built in Rust.

## Overview

Shoppers fill a cart by hand or by holding products in front of a camera.
Recognition runs in an external service; this crate owns the cart, talks to
the recognition service, decides when a recognized product goes into the
cart, and keeps the signed-in user's state.

## Architecture

### Cart Layer
- **Cart State Container** - Ordered product lines with add/remove/update/clear/total
- **Shared Cart** - One handle shared by the UI side and the feed client

### Feed Layer
- **Remote Feed** - Frames and predictions polled over HTTP, or pushed over Socket.IO
- **Local Capture** - Frames grabbed from a snapshot camera and submitted for recognition
- **Detection Pipeline** - Confidence threshold (0.85, inclusive) plus duplicate suppression
- **Connection Tracking** - Disconnected / Connecting / Connected, reported as events

### Session Layer
- **Auth Store** - Token and decoded claims, persisted through a key-value store
- **Catalog** - Product prices for auto-added items

## Key Features

- Dual-mode acquisition behind one client with explicit mode switching
- Every acquisition loop is owned by a guard; stopping, switching or dropping the
  client aborts the loops and releases cameras and sockets
- A displayed frame is released as soon as it is superseded
- Malformed recognition payloads never touch the cart

## Modules

- **cart**: Cart lines and the shared cart handle
- **detection**: Recognition results, the last-added guard and the detection pipeline
- **catalog**: Price sources (catalog and placeholder)
- **feed**: Feed client, polling, Socket.IO and local capture
- **auth**: Auth store and the HTTP auth service client
- **storage**: Key-value stores with gzip/bincode encoding
- **config**: Client configuration with environment overrides
- **context**: The explicitly passed application context
- **error**: Error types

## External Endpoints

- `GET /latest_image?_t=<millis>` - Latest camera frame
- `GET /latest_prediction?_t=<millis>` - Latest recognition result
- `POST /predict_product` - Recognize a submitted frame
- `/socket.io/` - Event stream (`frame`, `detection`, `error`, ...)
- `POST /auth/login`, `POST /auth/register`, `PUT /user/profile`, `POST /api/auth/refresh`
*/

pub mod auth;
pub mod cart;
pub mod catalog;
pub mod config;
pub mod context;
pub mod detection;
pub mod error;
pub mod feed;
pub mod storage;

pub use cart::{Cart, CartLine, Product, SharedCart};
pub use context::AppContext;
pub use detection::{DetectionOutcome, DetectionPipeline, DetectionResult, LastAddedGuard};
pub use error::{AuthError, FeedError, StorageError};
pub use feed::{ConnectionState, FeedClient, FeedEvent, FeedMode};

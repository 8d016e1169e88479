// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};

use crate::{
    replica::store::BlockStore,
    rpc::{
        message::{MessageKind, Request, Response},
        server::RequestHandler,
    },
};

/// Serves block reads and writes for one exported volume.
pub struct DiskHandler<S: BlockStore> {
    store: S,
}

impl<S: BlockStore> DiskHandler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: BlockStore> RequestHandler for DiskHandler<S> {
    async fn handle(&self, request: Request) -> Result<Response> {
        match request.kind {
            MessageKind::ReadRequest => {
                let data = self.store.read_at(request.offset, request.length).await?;
                Ok(Response::read(request.id, data))
            },
            MessageKind::WriteRequest => {
                self.store.write_at(request.offset, request.payload).await?;
                Ok(Response::write(request.id))
            },
            other => bail!("invalid request kind {other:?}"),
        }
    }
}

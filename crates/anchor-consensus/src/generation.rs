//! The local block generator.
//!
//! For every resident epoch, every `blockTime` ms: mint one block carrying
//! the configured extra data plus whatever the mempools hold, sign it, and
//! persist block + advanced pointer in a single batch. Generation runs at
//! most one block ahead of finalization — an anchor that outran its
//! finalizer would never finalize the tail and would look stalled to every
//! health monitor.

use crate::context::NodeContext;
use crate::now_ms;
use anchor_storage::{BatchOp, StorageError};
use anchor_types::block::{build_block_id, Block, BlockExtraData};
use anchor_types::epoch::{EpochDataHandler, GenerationThreadMetadata};
use anchor_types::keys::generation_metadata_key;
use std::sync::Arc;
use std::time::Duration;

/// Runs forever; spawn as a task.
pub async fn run(ctx: Arc<NodeContext>) {
    loop {
        let (block_time, handlers) = {
            let state = ctx.approvement.read().await;
            (
                state.network_parameters.block_time,
                state.epoch_handlers(),
            )
        };

        for handler in &handlers {
            if let Err(e) = generate_block(&ctx, handler).await {
                tracing::warn!(target: "generation", epoch = handler.id, "block generation failed: {e}");
            }
        }

        tokio::time::sleep(Duration::from_millis(block_time.max(1))).await;
    }
}

async fn generate_block(
    ctx: &Arc<NodeContext>,
    handler: &EpochDataHandler,
) -> Result<(), StorageError> {
    let full_id = handler.full_id();

    let runtime = ctx
        .finalization
        .ensure(handler, &ctx.stores.finalization_voting_stats, ctx.as_ref())
        .await;
    let accepted_index = runtime.state.lock().grabber.accepted_index;

    let metadata = {
        let mut pointers = ctx.generation.lock();
        pointers
            .entry(full_id.clone())
            .or_insert_with(|| GenerationThreadMetadata::initial(full_id.clone()))
            .clone()
    };

    // Bounded lead: at most one block may exist beyond the last finalized one.
    if metadata.next_index as i64 > accepted_index + 1 {
        return Ok(());
    }

    let extra_data = BlockExtraData {
        rest: ctx.config.extra_data_to_block.clone(),
        rotation_proofs: ctx.mempool.drain_rotation_proofs(handler.id),
        leader_finalization_proofs: ctx.mempool.drain_leader_finalization_proofs(handler.id),
    };

    let mut block = Block {
        creator: ctx.own_pubkey().to_string(),
        time: now_ms(),
        epoch: full_id.clone(),
        extra_data,
        index: metadata.next_index,
        prev_hash: metadata.prev_hash.clone(),
        sig: String::new(),
    };
    let block_hash = block.hash(ctx.network_id());
    block.sig = ctx.keypair.sign(&block_hash);

    let block_id = build_block_id(handler.id, &block.creator, block.index);
    let advanced = GenerationThreadMetadata {
        epoch_full_id: full_id.clone(),
        prev_hash: block_hash.clone(),
        next_index: metadata.next_index + 1,
    };

    let block_raw =
        serde_json::to_vec(&block).map_err(|e| StorageError::Codec(e.to_string()))?;
    let advanced_raw =
        serde_json::to_vec(&advanced).map_err(|e| StorageError::Codec(e.to_string()))?;

    let result = ctx.stores.blocks.write_batch(vec![
        BatchOp::Put(block_id.clone(), block_raw),
        BatchOp::Put(generation_metadata_key(&full_id), advanced_raw),
    ]);

    match result {
        Ok(()) => {
            // Only a committed batch advances the in-memory pointer.
            ctx.generation.lock().insert(full_id, advanced);
            tracing::info!(
                target: "generation",
                "new block generated {block_id} (hash: {}...)",
                &block_hash[..8]
            );
            Ok(())
        }
        Err(e) => {
            // The drained proofs go back so the next tick carries them.
            for proof in block.extra_data.rotation_proofs {
                ctx.mempool.add_rotation_proof(proof);
            }
            for proof in block.extra_data.leader_finalization_proofs {
                ctx.mempool.add_leader_finalization_proof(proof);
            }
            Err(e)
        }
    }
}

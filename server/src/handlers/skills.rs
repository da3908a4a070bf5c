//! Skill and trainer listings

use crate::context::HandlerContext;
use crate::error::PipelineError;
use crate::registry::PacketHandler;
use shared::Frame;

pub struct SkillListHandler;

impl PacketHandler for SkillListHandler {
    fn name(&self) -> &'static str {
        "skill-list"
    }

    fn handle(&self, ctx: &mut HandlerContext<'_>, frame: &mut Frame) -> Result<(), PipelineError> {
        let encoder = ctx.encoder(frame.code())?;
        let Some(player) = ctx.conn.player else {
            return Ok(());
        };
        let skills = ctx.server.world.skills(player);
        ctx.send_all(&encoder.skill_list(&skills, ctx.server.config.max_outbound_frame))
    }
}

pub struct TrainerWindowHandler;

impl PacketHandler for TrainerWindowHandler {
    fn name(&self) -> &'static str {
        "trainer-window"
    }

    fn handle(&self, ctx: &mut HandlerContext<'_>, frame: &mut Frame) -> Result<(), PipelineError> {
        let encoder = ctx.encoder(frame.code())?;
        let Some(snapshot) = ctx.conn.player.and_then(|id| ctx.server.world.player(id)) else {
            return Ok(());
        };
        let specs = ctx.server.world.specializations(snapshot.id);
        ctx.send(&encoder.trainer_window(&specs, snapshot.spec_points))
    }
}

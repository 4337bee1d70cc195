//! Functions registered on ReGameDLL hookchains
//!
//! The game library calls each function with its own `IHookChain` as the
//! first argument. Our chain ends in `IHookChain::callNext`, so hooks that
//! other ReGameDLL modules registered with a lower priority still run.
//! [`Hook::call_original`](crate::hooks::Hook::call_original) maps to
//! `IHookChain::callOriginal`.

use std::ffi::{c_int, c_void};
use std::sync::OnceLock;

use goldhook_sdk::{entvars_t, TraceResult, Vector};

use crate::entities::Entity;
use crate::game::{
    entity_of, entity_of_object, entvars_of, game_rules_hooks, player_hooks, DamageType,
    DropShieldArgs, GibType, GiveShieldArgs, KilledArgs, RoundEndArgs, RoundEndEvent, SpawnArgs,
    TakeDamageArgs, TraceAttackArgs, WinStatus,
};
use crate::hooks::{abort_on_panic, call_member, member_fn, vtable};

/// `IHookChain` slots and the `pev` offset used by every hook function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainContext {
    pub call_next: usize,
    pub call_original: usize,
    pub pev: usize,
}

static CONTEXT: OnceLock<ChainContext> = OnceLock::new();

/// Set the context once, before any hook function is registered
///
/// Returns false if a different context is already set.
pub(super) fn set_context(context: ChainContext) -> bool {
    *CONTEXT.get_or_init(|| context) == context
}

fn context() -> Option<&'static ChainContext> {
    let context = CONTEXT.get();
    if context.is_none() {
        tracing::error!("ReGameDLL hook called before its context was set");
    }
    context
}

/// Read a method of the foreign `IHookChain`
unsafe fn link<F: Copy>(chain: *mut c_void, index: usize) -> F {
    let address = vtable::virtual_function(chain, index);
    std::mem::transmute_copy(&address)
}

type SpawnLink = member_fn!((*mut c_void) -> ());

pub(super) extern "C" fn player_spawn(chain: *mut c_void, player: *mut c_void) {
    abort_on_panic(move || {
        let Some(ctx) = context() else { return };
        let next: SpawnLink = unsafe { link(chain, ctx.call_next) };
        let original: SpawnLink = unsafe { link(chain, ctx.call_original) };

        let Some(entity) = entity_of_object(player, ctx.pev) else {
            return unsafe { call_member!(next, chain, player) };
        };
        player_hooks().spawn.call_chain_with_last(
            |_| unsafe { call_member!(next, chain, player) },
            |_| unsafe { call_member!(original, chain, player) },
            &mut SpawnArgs { player: entity },
        )
    })
}

type TakeDamageLink =
    member_fn!((*mut c_void, *mut entvars_t, *mut entvars_t, *mut f32, c_int) -> c_int);

pub(super) extern "C" fn player_take_damage(
    chain: *mut c_void,
    player: *mut c_void,
    inflictor: *mut entvars_t,
    attacker: *mut entvars_t,
    damage: *mut f32,
    damage_type: c_int,
) -> c_int {
    abort_on_panic(move || {
        let Some(ctx) = context() else { return 0 };
        let next: TakeDamageLink = unsafe { link(chain, ctx.call_next) };
        let original: TakeDamageLink = unsafe { link(chain, ctx.call_original) };

        let Some(entity) = entity_of_object(player, ctx.pev) else {
            return unsafe { call_member!(next, chain, player, inflictor, attacker, damage, damage_type) };
        };

        // The damage is passed by reference, write the hooked amount back
        // before forwarding
        let forward = |f: TakeDamageLink| {
            move |args: &mut TakeDamageArgs| unsafe {
                *damage = args.damage;
                call_member!(
                    f,
                    chain,
                    player,
                    entvars_of(&args.inflictor),
                    entvars_of(&args.attacker),
                    damage,
                    args.damage_type.to_raw()
                ) != 0
            }
        };
        let mut args = TakeDamageArgs {
            player: entity,
            inflictor: entity_of(inflictor),
            attacker: entity_of(attacker),
            damage: unsafe { *damage },
            damage_type: DamageType::from_raw(damage_type),
        };
        let result = player_hooks()
            .take_damage
            .call_chain_with_last(forward(next), forward(original), &mut args);
        c_int::from(result)
    })
}

type TraceAttackLink =
    member_fn!((*mut c_void, *mut entvars_t, f32, *mut Vector, *mut TraceResult, c_int) -> ());

pub(super) extern "C" fn player_trace_attack(
    chain: *mut c_void,
    player: *mut c_void,
    attacker: *mut entvars_t,
    damage: f32,
    direction: *mut Vector,
    trace: *mut TraceResult,
    damage_type: c_int,
) {
    abort_on_panic(move || {
        let Some(ctx) = context() else { return };
        let next: TraceAttackLink = unsafe { link(chain, ctx.call_next) };
        let original: TraceAttackLink = unsafe { link(chain, ctx.call_original) };

        let Some(entity) = entity_of_object(player, ctx.pev) else {
            return unsafe {
                call_member!(next, chain, player, attacker, damage, direction, trace, damage_type)
            };
        };

        let forward = |f: TraceAttackLink| {
            move |args: &mut TraceAttackArgs| unsafe {
                *direction = Vector::from(args.direction);
                call_member!(
                    f,
                    chain,
                    player,
                    entvars_of(&args.attacker),
                    args.damage,
                    direction,
                    args.trace,
                    args.damage_type.to_raw()
                )
            }
        };
        let mut args = TraceAttackArgs {
            player: entity,
            attacker: entity_of(attacker),
            damage,
            direction: unsafe { (*direction).into() },
            trace,
            damage_type: DamageType::from_raw(damage_type),
        };
        player_hooks()
            .trace_attack
            .call_chain_with_last(forward(next), forward(original), &mut args)
    })
}

type KilledLink = member_fn!((*mut c_void, *mut entvars_t, c_int) -> ());

pub(super) extern "C" fn player_killed(
    chain: *mut c_void,
    player: *mut c_void,
    attacker: *mut entvars_t,
    gib: c_int,
) {
    abort_on_panic(move || {
        let Some(ctx) = context() else { return };
        let next: KilledLink = unsafe { link(chain, ctx.call_next) };
        let original: KilledLink = unsafe { link(chain, ctx.call_original) };

        let Some(entity) = entity_of_object(player, ctx.pev) else {
            return unsafe { call_member!(next, chain, player, attacker, gib) };
        };

        let forward = |f: KilledLink| {
            move |args: &mut KilledArgs| unsafe {
                call_member!(f, chain, player, entvars_of(&args.attacker), args.gib.to_raw())
            }
        };
        let mut args = KilledArgs {
            player: entity,
            attacker: entity_of(attacker),
            gib: GibType::from_raw(gib),
        };
        player_hooks()
            .killed
            .call_chain_with_last(forward(next), forward(original), &mut args)
    })
}

type GiveShieldLink = member_fn!((*mut c_void, bool) -> ());

pub(super) extern "C" fn player_give_shield(chain: *mut c_void, player: *mut c_void, deploy: bool) {
    abort_on_panic(move || {
        let Some(ctx) = context() else { return };
        let next: GiveShieldLink = unsafe { link(chain, ctx.call_next) };
        let original: GiveShieldLink = unsafe { link(chain, ctx.call_original) };

        let Some(entity) = entity_of_object(player, ctx.pev) else {
            return unsafe { call_member!(next, chain, player, deploy) };
        };

        let forward = |f: GiveShieldLink| {
            move |args: &mut GiveShieldArgs| unsafe { call_member!(f, chain, player, args.deploy) }
        };
        let mut args = GiveShieldArgs {
            player: entity,
            deploy,
        };
        player_hooks()
            .give_shield
            .call_chain_with_last(forward(next), forward(original), &mut args)
    })
}

type DropShieldLink = member_fn!((*mut c_void, bool) -> *mut c_void);

pub(super) extern "C" fn player_drop_shield(
    chain: *mut c_void,
    player: *mut c_void,
    deploy: bool,
) -> *mut c_void {
    abort_on_panic(move || {
        let Some(ctx) = context() else {
            return std::ptr::null_mut();
        };
        let next: DropShieldLink = unsafe { link(chain, ctx.call_next) };
        let original: DropShieldLink = unsafe { link(chain, ctx.call_original) };

        let Some(entity) = entity_of_object(player, ctx.pev) else {
            return unsafe { call_member!(next, chain, player, deploy) };
        };

        // The dropped shield comes back as a game object, hooks see its wrapper
        let forward = |f: DropShieldLink| {
            move |args: &mut DropShieldArgs| {
                let shield = unsafe { call_member!(f, chain, player, args.deploy) };
                entity_of_object(shield, ctx.pev)
            }
        };
        let mut args = DropShieldArgs {
            player: entity,
            deploy,
        };
        player_hooks()
            .drop_shield
            .call_chain_with_last(forward(next), forward(original), &mut args)
            .map_or(std::ptr::null_mut(), |shield| shield.private_data())
    })
}

type RoundEndLink = member_fn!((c_int, c_int, f32) -> bool);

pub(super) extern "C" fn round_end(
    chain: *mut c_void,
    win_status: c_int,
    event: c_int,
    delay: f32,
) -> bool {
    abort_on_panic(move || {
        let Some(ctx) = context() else { return false };
        let next: RoundEndLink = unsafe { link(chain, ctx.call_next) };
        let original: RoundEndLink = unsafe { link(chain, ctx.call_original) };

        let forward = |f: RoundEndLink| {
            move |args: &mut RoundEndArgs| unsafe {
                call_member!(f, chain, args.win_status.to_raw(), args.event.0, args.delay)
            }
        };
        let mut args = RoundEndArgs {
            win_status: WinStatus::from_raw(win_status),
            event: RoundEndEvent(event),
            delay,
        };
        game_rules_hooks()
            .round_end
            .call_chain_with_last(forward(next), forward(original), &mut args)
    })
}

type RoundFreezeEndLink = member_fn!(() -> ());

pub(super) extern "C" fn round_freeze_end(chain: *mut c_void) {
    abort_on_panic(move || {
        let Some(ctx) = context() else { return };
        let next: RoundFreezeEndLink = unsafe { link(chain, ctx.call_next) };
        let original: RoundFreezeEndLink = unsafe { link(chain, ctx.call_original) };

        game_rules_hooks().round_freeze_end.call_chain_with_last(
            |_| unsafe { call_member!(next, chain) },
            |_| unsafe { call_member!(original, chain) },
            &mut (),
        )
    })
}

#[cfg(test)]
pub(super) mod tests {
    use super::*;
    use crate::hooks::{member_trampoline, HookPriority};

    pub const TEST_CONTEXT: ChainContext = ChainContext {
        call_next: 0,
        call_original: 1,
        pev: 4,
    };

    /// Fake `IHookChain<bool, int, ScenarioEventEndRound, float>`
    #[repr(C)]
    struct FakeRoundEndChain {
        vtable: *const usize,
        next_calls: u32,
        original_calls: u32,
        delay: f32,
        win_status: c_int,
    }

    member_trampoline! {
        fn fake_next(this, win_status: c_int, _event: c_int, delay: f32) -> bool {
            let chain = unsafe { &mut *(this as *mut FakeRoundEndChain) };
            chain.next_calls += 1;
            chain.delay = delay;
            chain.win_status = win_status;
            true
        }
    }

    member_trampoline! {
        fn fake_original(this, _win_status: c_int, _event: c_int, _delay: f32) -> bool {
            let chain = unsafe { &mut *(this as *mut FakeRoundEndChain) };
            chain.original_calls += 1;
            false
        }
    }

    #[test]
    fn test_context_set_once() {
        assert!(set_context(TEST_CONTEXT));
        assert!(set_context(TEST_CONTEXT));
        assert!(!set_context(ChainContext {
            pev: 8,
            ..TEST_CONTEXT
        }));
    }

    #[test]
    fn test_round_end_reaches_foreign_chain() {
        assert!(set_context(TEST_CONTEXT));
        let table = [fake_next as usize, fake_original as usize];
        let mut fake = FakeRoundEndChain {
            vtable: table.as_ptr(),
            next_calls: 0,
            original_calls: 0,
            delay: 0.0,
            win_status: 0,
        };
        let chain = &mut fake as *mut FakeRoundEndChain as *mut c_void;

        let registry = &game_rules_hooks().round_end;
        let key = registry.register_hook(
            |hook, args| {
                assert_eq!(args.event, RoundEndEvent::BOMB_DEFUSED);
                args.delay = 3.0;
                args.win_status = WinStatus::CTs;
                hook.call_next(args)
            },
            HookPriority::Default,
        );

        let ended = round_end(chain, WinStatus::Terrorists.to_raw(), RoundEndEvent::BOMB_DEFUSED.0, 5.0);
        registry.unregister_hook(key);

        assert!(ended);
        assert_eq!(fake.next_calls, 1);
        assert_eq!(fake.original_calls, 0);
        assert_eq!(fake.delay, 3.0);
        assert_eq!(fake.win_status, WinStatus::CTs.to_raw());
    }
}

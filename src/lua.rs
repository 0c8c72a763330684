// src/lua.rs - Lua scripts for atomic moves
use redis::Script;

pub struct LuaScripts {
    pub pop_move: Script,
    pub remove_move: Script,
    pub length: Script,
}

impl LuaScripts {
    pub fn new() -> Self {
        // Script hashes are computed here; redis-rs loads them on first NOSCRIPT.
        Self {
            pop_move: Script::new(include_str!("./lua/pop_move.lua")),
            remove_move: Script::new(include_str!("./lua/remove_move.lua")),
            length: Script::new(include_str!("./lua/length.lua")),
        }
    }
}

impl Default for LuaScripts {
    fn default() -> Self {
        Self::new()
    }
}

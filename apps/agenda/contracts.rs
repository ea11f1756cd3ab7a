use alloy::sol;

sol! {
    /// Read surface of the DAO agenda manager.
    interface DAOAgendaManager {
        function numAgendas() external view returns (uint256);

        function agendas(uint256 id) external view returns (
            uint256 createdTimestamp,
            uint256 noticeEndTimestamp,
            uint256 votingPeriodInSeconds,
            uint256 votingStartedTimestamp,
            uint256 votingEndTimestamp,
            uint256 executableLimitTimestamp,
            uint256 executedTimestamp,
            uint256 countingYes,
            uint256 countingNo,
            uint256 countingAbstain,
            uint8 status,
            uint8 result,
            bool executed
        );
    }

    /// Committee proxy: seats plus the governance events.
    interface DAOCommittee {
        function maxMember() external view returns (uint256);

        function members(uint256 slot) external view returns (address);

        event AgendaCreated(
            address indexed from,
            uint256 indexed id,
            address[] targets,
            uint128 noticePeriodSeconds,
            uint128 votingPeriodSeconds,
            bool atomicExecute
        );

        event AgendaVoteCasted(
            address indexed from,
            uint256 indexed id,
            uint256 voting,
            string comment
        );

        event AgendaExecuted(uint256 indexed id, address[] target);

        event ChangedMember(
            uint256 indexed slotIndex,
            address prevMember,
            address indexed newMember
        );
    }
}
